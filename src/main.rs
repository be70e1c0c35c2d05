mod client;
mod config;
mod events;
mod session;
mod tui;

use anyhow::Result;
use clap::Parser;
use config::{ConfigFile, ResolvedConfig};
use tokio::sync::mpsc;

use crate::events::Classified;
use crate::session::{ConfigMode, Effect, RunConfig, SessionState};

#[derive(Parser, Debug)]
#[command(
    name = "mission-control",
    about = "Terminal mission-control console for a remote agent orchestrator",
    long_about = None,
)]
struct Args {
    /// Command to dispatch directly (omit to enter the interactive console)
    command: Option<String>,

    /// Profile to use from config file
    #[arg(short, long, env = "MISSION_CONTROL_PROFILE")]
    profile: Option<String>,

    /// Override orchestrator endpoint URL
    #[arg(long, env = "MISSION_CONTROL_ENDPOINT")]
    endpoint: Option<String>,

    /// Override session id (default: profile value, or a fresh id per launch)
    #[arg(short, long, env = "MISSION_CONTROL_SESSION")]
    session: Option<String>,

    /// Keep run-setting edits client-local (never POST them back)
    #[arg(long)]
    local_config: bool,

    /// Show timestamps on user messages too
    #[arg(long)]
    timestamps: bool,

    /// Write a default config file to ~/.config/mission-control/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: mission-control");
        return Ok(());
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.session.as_deref(),
        args.local_config,
    );

    // ── Single-shot mode (plain stdout, no TUI) ───────────────────────────────
    if let Some(command) = args.command {
        return run_single_shot(command, resolved).await;
    }

    // ── Interactive console ───────────────────────────────────────────────────
    tui::run(resolved, args.timestamps).await
}

/// Tracing to a file — the TUI owns the terminal, so nothing may write to
/// stdout/stderr while it runs. Logging failures are non-fatal.
fn init_logging() {
    let path = config::log_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    else {
        return;
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mission_control=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .init();
}

fn print_profiles(file: &ConfigFile) {
    if file.profiles.is_empty() {
        println!("No profiles configured. Run `mission-control --init` to create one.");
        return;
    }
    let mut names: Vec<_> = file.profiles.keys().collect();
    names.sort();
    for name in names {
        let profile = &file.profiles[name];
        let marker = if *name == file.default_profile { "*" } else { " " };
        println!("{marker} {name:<16} {}", profile.endpoint);
    }
}

// ── Single-shot mode ──────────────────────────────────────────────────────────

/// Dispatch one command and stream pushed events to stdout until the
/// finalized reply arrives. Telemetry lines go to the intel prefix, thinking
/// updates to a status prefix — same classification path as the console.
async fn run_single_shot(command: String, resolved: ResolvedConfig) -> Result<()> {
    println!();
    println!("  ▲ mission-control  {}  ·  {}", resolved.profile_name, resolved.endpoint);
    println!();

    let client = client::Client::new(&resolved.endpoint);
    let run_config = RunConfig {
        agent_id: resolved.agent_id.clone(),
        system_prompt: resolved.system_prompt.clone(),
        temperature: resolved.temperature,
        top_p: None,
        top_k: None,
    };
    let mut session = SessionState::new(
        resolved.session_id.clone(),
        run_config,
        ConfigMode::LocalOnly,
    );

    // Subscribe before dispatching so the reply cannot race past us.
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let sse_handle = client.subscribe(push_tx);

    let Some(Effect::Dispatch { command, session_id }) = session.submit(&command) else {
        anyhow::bail!("empty command");
    };

    if let Err(e) = client.send_command(&command, &session_id).await {
        session.dispatch_failed(&format!("{e:#}"));
        if let Some(last) = session.transcript.last() {
            eprintln!("  {}", last.content);
        }
        sse_handle.abort();
        std::process::exit(1);
    }
    session.dispatch_done();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            maybe = push_rx.recv() => {
                let Some(event) = maybe else { break };
                // Classify once; the printed line and the state transition
                // share the same verdict.
                let verdict = event.classify();
                session.apply_classified(verdict.clone());
                match verdict {
                    Classified::Telemetry(line) => println!("  [intel] {line}"),
                    Classified::Thinking { label } => println!("  … {label}"),
                    Classified::Reply { text, finalized } => {
                        println!();
                        println!("{text}");
                        if finalized {
                            break;
                        }
                    }
                }
            }
        }
    }

    sse_handle.abort();
    Ok(())
}
