/// Ratatui console for Mission Control.
///
/// Architecture:
///   main thread:  event loop — crossterm keyboard events + mpsc UiEvent drain
///   SSE task:     tokio::spawn — forwards push events via UnboundedSender
///   fetch tasks:  tokio::spawn per request — completions re-enter as UiEvents
///
/// All state mutation happens here on the single control thread. Push events
/// are applied strictly in arrival order, one at a time; every network
/// completion comes back as a UiEvent rather than touching state directly.
///
/// Layout:
///   ┌──────────┬──────────────────────────────┬────────────────┐
///   │ mission  │  transcript (scrollable)     │ run settings   │
///   │ history  ├──────────────────────────────┤                │
///   │          │  status bar (1 line)         │ live intel     │
///   │          ├──────────────────────────────┤ feed           │
///   │          │  input box (3 lines)         │                │
///   └──────────┴──────────────────────────────┴────────────────┘
pub mod render;

use std::io;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;

use crate::client::{AgentTask, Client};
use crate::config::ResolvedConfig;
use crate::events::PushEvent;
use crate::session::{ConfigMode, ConfigPatch, Effect, RunConfig, SessionState};

// ── UiEvent — typed completions from background tasks ────────────────────────

#[derive(Debug)]
pub enum UiEvent {
    /// One message from the push channel
    Push(PushEvent),
    /// Startup history fetch completed
    HistoryLoaded(Vec<crate::client::HistoryMessage>),
    /// Task list fetch completed (startup or post-response refresh)
    TasksLoaded(Vec<AgentTask>),
    /// Server run config fetch completed (Persisted mode startup)
    ConfigLoaded(RunConfig),
    /// Command POST succeeded — releases the in-flight guard
    DispatchOk,
    /// Command POST failed — surfaced in the transcript
    DispatchFailed(String),
}

// ── Focus — which pane owns the keyboard ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Settings,
}

/// Editable rows in the run-settings panel, in display order.
pub const SETTING_ROWS: [&str; 4] = ["temperature", "top_p", "top_k", "system prompt"];

// ── AppState ──────────────────────────────────────────────────────────────────

pub struct AppState {
    pub session: SessionState,
    pub tasks: Vec<AgentTask>,
    pub input: String,
    pub cursor: usize, // byte offset in input
    pub focus: Focus,
    /// Selected row in the settings panel (index into SETTING_ROWS)
    pub setting_selected: usize,
    /// Some = system prompt inline edit in progress (buffer)
    pub prompt_edit: Option<String>,
    /// Lines scrolled up from the bottom of the transcript
    pub scroll: usize,
    /// Incremented every tick while thinking, for the shimmer dot
    pub spinner_tick: u32,
    pub show_timestamps: bool,
    pub profile_name: String,
    pub endpoint: String,
    pub sidebar_visible: bool,
}

impl AppState {
    pub fn new(resolved: &ResolvedConfig, show_timestamps: bool) -> Self {
        let mode = if resolved.persist_run_config {
            ConfigMode::Persisted
        } else {
            ConfigMode::LocalOnly
        };
        let run_config = RunConfig {
            agent_id: resolved.agent_id.clone(),
            system_prompt: resolved.system_prompt.clone(),
            temperature: resolved.temperature,
            top_p: None,
            top_k: None,
        };
        Self {
            session: SessionState::new(resolved.session_id.clone(), run_config, mode),
            tasks: Vec::new(),
            input: String::new(),
            cursor: 0,
            focus: Focus::Input,
            setting_selected: 0,
            prompt_edit: None,
            scroll: 0,
            spinner_tick: 0,
            show_timestamps,
            profile_name: resolved.profile_name.clone(),
            endpoint: resolved.endpoint.clone(),
            sidebar_visible: false,
        }
    }

    fn apply_ui_event(
        &mut self,
        ev: UiEvent,
        client: &Client,
        ui_tx: &mpsc::UnboundedSender<UiEvent>,
    ) {
        match ev {
            UiEvent::Push(push) => {
                let effects = self.session.apply(&push);
                run_effects(effects, client, ui_tx);
            }
            UiEvent::HistoryLoaded(messages) => {
                self.session
                    .seed_history(messages.into_iter().map(|m| (m.role, m.content)));
            }
            UiEvent::TasksLoaded(tasks) => {
                self.tasks = tasks;
            }
            UiEvent::ConfigLoaded(config) => {
                self.session.adopt_config(config);
            }
            UiEvent::DispatchOk => {
                self.session.dispatch_done();
            }
            UiEvent::DispatchFailed(detail) => {
                tracing::warn!(%detail, "command dispatch failed");
                self.session.dispatch_failed(&detail);
            }
        }
        // Derived view output: new transcript content pins the view to the
        // bottom; manual scrolling is otherwise preserved.
        if self.session.take_scroll_request() {
            self.scroll = 0;
        }
    }
}

// ── Effect runner ─────────────────────────────────────────────────────────────

/// Run reducer effects by spawning the I/O and routing completions back as
/// UiEvents. Background refresh failures are logged and swallowed; only the
/// command dispatch surfaces its failure to the user.
fn run_effects(effects: Vec<Effect>, client: &Client, ui_tx: &mpsc::UnboundedSender<UiEvent>) {
    for effect in effects {
        match effect {
            Effect::Dispatch { command, session_id } => {
                let client = client.clone();
                let tx = ui_tx.clone();
                tokio::spawn(async move {
                    let ev = match client.send_command(&command, &session_id).await {
                        Ok(()) => UiEvent::DispatchOk,
                        Err(e) => UiEvent::DispatchFailed(format!("{e:#}")),
                    };
                    let _ = tx.send(ev);
                });
            }
            Effect::RefreshTasks => {
                let client = client.clone();
                let tx = ui_tx.clone();
                tokio::spawn(async move {
                    match client.tasks().await {
                        Ok(tasks) => {
                            let _ = tx.send(UiEvent::TasksLoaded(tasks));
                        }
                        Err(e) => tracing::warn!(error = %e, "task refresh failed"),
                    }
                });
            }
            Effect::SaveConfig(config) => {
                let client = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.save_config(&config).await {
                        tracing::warn!(error = %e, "run config write failed");
                    }
                });
            }
        }
    }
}

// ── Terminal setup / teardown ─────────────────────────────────────────────────

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}

// ── Main TUI run loop ─────────────────────────────────────────────────────────

pub async fn run(resolved: ResolvedConfig, show_timestamps: bool) -> Result<()> {
    let mut terminal = setup_terminal()?;

    // Panic hook — restore terminal before printing panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        orig_hook(info);
    }));

    let result = event_loop(&mut terminal, resolved, show_timestamps).await;

    restore_terminal(&mut terminal);
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    resolved: ResolvedConfig,
    show_timestamps: bool,
) -> Result<()> {
    let client = Client::new(&resolved.endpoint);
    let mut state = AppState::new(&resolved, show_timestamps);

    // Auto-show sidebar when terminal is wide enough
    if let Ok((w, _)) = crossterm::terminal::size() {
        state.sidebar_visible = w >= 110;
    }

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();

    // ── Push channel subscription ─────────────────────────────────────────────
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<PushEvent>();
    let sse_handle = client.subscribe(push_tx);

    // ── Startup fetches — history, tasks, and (Persisted mode) run config ────
    {
        let c = client.clone();
        let tx = ui_tx.clone();
        let session_id = resolved.session_id.clone();
        tokio::spawn(async move {
            match c.history(&session_id).await {
                Ok(messages) => {
                    let _ = tx.send(UiEvent::HistoryLoaded(messages));
                }
                Err(e) => tracing::warn!(error = %e, "history fetch failed"),
            }
        });
    }
    {
        let c = client.clone();
        let tx = ui_tx.clone();
        tokio::spawn(async move {
            match c.tasks().await {
                Ok(tasks) => {
                    let _ = tx.send(UiEvent::TasksLoaded(tasks));
                }
                Err(e) => tracing::warn!(error = %e, "task fetch failed"),
            }
        });
    }
    if resolved.persist_run_config {
        let c = client.clone();
        let tx = ui_tx.clone();
        let agent_id = resolved.agent_id.clone();
        tokio::spawn(async move {
            match c.config(&agent_id).await {
                Ok(Some(config)) => {
                    let _ = tx.send(UiEvent::ConfigLoaded(config));
                }
                Ok(None) => tracing::info!(%agent_id, "no server-side run config yet"),
                Err(e) => tracing::warn!(error = %e, "config fetch failed"),
            }
        });
    }

    let mut crossterm_events = EventStream::new();
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(120));

    terminal.draw(|f| render::draw(f, &state))?;

    loop {
        tokio::select! {
            // ── Animation tick ────────────────────────────────────────────────
            _ = ticker.tick() => {
                if state.session.thinking.active {
                    state.spinner_tick = state.spinner_tick.wrapping_add(1);
                    terminal.draw(|f| render::draw(f, &state))?;
                }
            }

            // ── Push channel — strictly in arrival order ──────────────────────
            Some(push) = push_rx.recv() => {
                state.apply_ui_event(UiEvent::Push(push), &client, &ui_tx);
                terminal.draw(|f| render::draw(f, &state))?;
            }

            // ── Background request completions ────────────────────────────────
            Some(ev) = ui_rx.recv() => {
                state.apply_ui_event(ev, &client, &ui_tx);
                terminal.draw(|f| render::draw(f, &state))?;
            }

            // ── Keyboard/resize events ────────────────────────────────────────
            Some(Ok(ev)) = crossterm_events.next() => {
                match ev {
                    Event::Key(key) => {
                        if !handle_key(key, &mut state, &client, &ui_tx) {
                            break;
                        }
                    }
                    Event::Resize(w, _) => {
                        state.sidebar_visible = w >= 110;
                    }
                    _ => {}
                }
                terminal.draw(|f| render::draw(f, &state))?;
            }
        }
    }

    // Teardown: release the push-channel subscription so no further callbacks
    // arrive. In-flight POSTs are not cancelled (best-effort only).
    sse_handle.abort();

    Ok(())
}

// ── Key handler ───────────────────────────────────────────────────────────────

/// Returns false when the loop should exit.
fn handle_key(
    key: KeyEvent,
    state: &mut AppState,
    client: &Client,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return false;
    }

    // System prompt inline edit captures everything until commit/cancel
    if state.prompt_edit.is_some() {
        handle_prompt_edit_key(key, state, client, ui_tx);
        return true;
    }

    match state.focus {
        Focus::Input => handle_input_key(key, state, client, ui_tx),
        Focus::Settings => handle_settings_key(key, state, client, ui_tx),
    }
    true
}

fn handle_prompt_edit_key(
    key: KeyEvent,
    state: &mut AppState,
    client: &Client,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) {
    match key.code {
        // Multi-line instructions: Shift+Enter inserts a line break,
        // plain Enter commits.
        KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
            if let Some(buffer) = &mut state.prompt_edit {
                buffer.push('\n');
            }
        }
        KeyCode::Enter => {
            let prompt = state.prompt_edit.take().unwrap_or_default();
            let effects = state
                .session
                .update_config(ConfigPatch {
                    system_prompt: Some(prompt),
                    ..Default::default()
                })
                .into_iter()
                .collect();
            run_effects(effects, client, ui_tx);
        }
        KeyCode::Esc => {
            state.prompt_edit = None;
        }
        KeyCode::Backspace => {
            if let Some(buffer) = &mut state.prompt_edit {
                buffer.pop();
            }
        }
        KeyCode::Char(c) => {
            if let Some(buffer) = &mut state.prompt_edit {
                buffer.push(c);
            }
        }
        _ => {}
    }
}

fn handle_input_key(
    key: KeyEvent,
    state: &mut AppState,
    client: &Client,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) {
    match key.code {
        KeyCode::Tab => {
            state.focus = Focus::Settings;
        }
        KeyCode::Enter => {
            // Precondition violations (blank input, busy session) are silent
            // no-ops inside submit — the input buffer only clears on accept.
            let text = state.input.clone();
            if let Some(effect) = state.session.submit(&text) {
                state.input.clear();
                state.cursor = 0;
                state.scroll = 0;
                state.session.take_scroll_request();
                run_effects(vec![effect], client, ui_tx);
            }
        }
        KeyCode::Backspace => {
            if state.cursor > 0 {
                let prev = prev_boundary(&state.input, state.cursor);
                state.input.replace_range(prev..state.cursor, "");
                state.cursor = prev;
            }
        }
        KeyCode::Left => {
            if state.cursor > 0 {
                state.cursor = prev_boundary(&state.input, state.cursor);
            }
        }
        KeyCode::Right => {
            if state.cursor < state.input.len() {
                state.cursor = next_boundary(&state.input, state.cursor);
            }
        }
        KeyCode::Home => state.cursor = 0,
        KeyCode::End => state.cursor = state.input.len(),
        KeyCode::Up => state.scroll = state.scroll.saturating_add(1),
        KeyCode::Down => state.scroll = state.scroll.saturating_sub(1),
        KeyCode::PageUp => state.scroll = state.scroll.saturating_add(10),
        KeyCode::PageDown => state.scroll = state.scroll.saturating_sub(10),
        KeyCode::Char(c) => {
            state.input.insert(state.cursor, c);
            state.cursor += c.len_utf8();
        }
        _ => {}
    }
}

fn handle_settings_key(
    key: KeyEvent,
    state: &mut AppState,
    client: &Client,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) {
    match key.code {
        KeyCode::Tab | KeyCode::Esc => {
            state.focus = Focus::Input;
        }
        KeyCode::Up => {
            state.setting_selected = state.setting_selected.saturating_sub(1);
        }
        KeyCode::Down => {
            state.setting_selected = (state.setting_selected + 1).min(SETTING_ROWS.len() - 1);
        }
        KeyCode::Left | KeyCode::Right => {
            if let Some(patch) = adjust_patch(state, key.code == KeyCode::Right) {
                let effects = state.session.update_config(patch).into_iter().collect();
                run_effects(effects, client, ui_tx);
            }
        }
        KeyCode::Enter => {
            if SETTING_ROWS[state.setting_selected] == "system prompt" {
                state.prompt_edit = Some(state.session.run_config.system_prompt.clone());
            }
        }
        _ => {}
    }
}

/// Build the field patch for a left/right nudge on the selected settings row.
/// The reducer clamps; this only steps.
fn adjust_patch(state: &AppState, up: bool) -> Option<ConfigPatch> {
    let cfg = &state.session.run_config;
    let step = if up { 0.1 } else { -0.1 };
    match SETTING_ROWS[state.setting_selected] {
        "temperature" => Some(ConfigPatch {
            temperature: Some(cfg.temperature + step),
            ..Default::default()
        }),
        "top_p" => Some(ConfigPatch {
            top_p: Some(cfg.top_p.unwrap_or(1.0) + step),
            ..Default::default()
        }),
        "top_k" => {
            let current = cfg.top_k.unwrap_or(0);
            let next = if up {
                current + 1
            } else {
                current.saturating_sub(1)
            };
            Some(ConfigPatch {
                top_k: Some(next),
                ..Default::default()
            })
        }
        _ => None,
    }
}

// ── Cursor helpers ────────────────────────────────────────────────────────────

fn prev_boundary(s: &str, at: usize) -> usize {
    let mut i = at - 1;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_boundary(s: &str, at: usize) -> usize {
    let mut i = at + 1;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_helpers_respect_utf8() {
        let s = "a€b";
        assert_eq!(next_boundary(s, 0), 1);
        assert_eq!(next_boundary(s, 1), 4); // € is 3 bytes
        assert_eq!(prev_boundary(s, 4), 1);
        assert_eq!(prev_boundary(s, 1), 0);
    }

    #[test]
    fn setting_rows_cover_every_editable_field() {
        assert!(SETTING_ROWS.contains(&"temperature"));
        assert!(SETTING_ROWS.contains(&"top_p"));
        assert!(SETTING_ROWS.contains(&"top_k"));
        assert!(SETTING_ROWS.contains(&"system prompt"));
    }

    fn test_state() -> AppState {
        let resolved = ResolvedConfig {
            endpoint: "http://localhost:8000".to_string(),
            session_id: "test-session".to_string(),
            agent_id: "punisher".to_string(),
            persist_run_config: false,
            system_prompt: String::new(),
            temperature: 0.7,
            profile_name: "default".to_string(),
        };
        AppState::new(&resolved, false)
    }

    #[test]
    fn prompt_editor_supports_multi_line_instructions() {
        let mut state = test_state();
        state.prompt_edit = Some("line one".to_string());
        let client = Client::new("http://localhost:8000");
        let (tx, _rx) = mpsc::unbounded_channel();

        // Shift+Enter breaks the line, plain Enter commits the merge.
        handle_prompt_edit_key(
            KeyEvent::new(KeyCode::Enter, KeyModifiers::SHIFT),
            &mut state,
            &client,
            &tx,
        );
        handle_prompt_edit_key(
            KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE),
            &mut state,
            &client,
            &tx,
        );
        assert_eq!(state.prompt_edit.as_deref(), Some("line one\nx"));

        handle_prompt_edit_key(
            KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE),
            &mut state,
            &client,
            &tx,
        );
        assert!(state.prompt_edit.is_none());
        assert_eq!(state.session.run_config.system_prompt, "line one\nx");
    }

    #[test]
    fn prompt_editor_esc_discards_the_buffer() {
        let mut state = test_state();
        state.session.run_config.system_prompt = "keep me".to_string();
        state.prompt_edit = Some("scratch".to_string());
        let client = Client::new("http://localhost:8000");
        let (tx, _rx) = mpsc::unbounded_channel();

        handle_prompt_edit_key(
            KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE),
            &mut state,
            &client,
            &tx,
        );
        assert!(state.prompt_edit.is_none());
        assert_eq!(state.session.run_config.system_prompt, "keep me");
    }
}
