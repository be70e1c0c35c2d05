use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Orchestrator base URL
    pub endpoint: String,
    /// Fixed session id. Omit to generate a fresh one per launch.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Agent whose run config this console edits
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// When true, run-setting edits are written back to the server
    /// (`POST /api/agents/config`). When false they stay local UI state.
    #[serde(default = "default_persist_run_config")]
    pub persist_run_config: bool,
    /// Default system instruction shown before the server copy loads
    /// (or permanently, in local-only mode).
    #[serde(default)]
    pub system_prompt: String,
    /// Default sampling temperature, clamped to [0,1]
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_agent_id() -> String {
    "punisher".to_string()
}

fn default_persist_run_config() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            session_id: None,
            agent_id: default_agent_id(),
            persist_run_config: default_persist_run_config(),
            system_prompt: String::new(),
            temperature: default_temperature(),
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }

    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    /// Final session id — override > profile > freshly generated
    pub session_id: String,
    pub agent_id: String,
    pub persist_run_config: bool,
    pub system_prompt: String,
    pub temperature: f64,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        session_override: Option<&str>,
        local_config_override: bool,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        let session_id = session_override
            .map(str::to_string)
            .or(base.session_id)
            .unwrap_or_else(generate_session_id);

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            session_id,
            agent_id: base.agent_id,
            persist_run_config: base.persist_run_config && !local_config_override,
            system_prompt: base.system_prompt,
            temperature: base.temperature.clamp(0.0, 1.0),
            profile_name,
        }
    }
}

/// Unique per-launch session id: "{unix_ts}-console".
fn generate_session_id() -> String {
    format!("{}-console", chrono::Utc::now().timestamp())
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mission-control")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

/// Log file location — the TUI owns the terminal, so tracing output goes to
/// a file under the data dir.
pub fn log_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".local/share")
        })
        .join("mission-control")
        .join("console.log")
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# Mission Control configuration
# Run `mission-control --init` to regenerate this file.

default_profile = "local"

# ── Local orchestrator (default) ──────────────────────────────────────────────
[profiles.local]
endpoint           = "http://localhost:8000"
agent_id           = "punisher"
# session_id       = "web-session-1"   # omit for a fresh session per launch
persist_run_config = true              # false = run settings stay client-local
temperature        = 0.7

# ── Remote deployment example ─────────────────────────────────────────────────
# [profiles.remote]
# endpoint           = "https://ops.example.com"
# agent_id           = "punisher"
# session_id         = "ops-main"
# persist_run_config = true
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_cli_overrides() {
        let mut file = ConfigFile::default();
        file.default_profile = "default".to_string();
        file.profiles.insert(
            "default".to_string(),
            Profile {
                endpoint: "http://profile:8000".to_string(),
                session_id: Some("fixed".to_string()),
                ..Default::default()
            },
        );

        let resolved = ResolvedConfig::resolve(
            &file,
            None,
            Some("http://cli:9000"),
            Some("override"),
            false,
        );
        assert_eq!(resolved.endpoint, "http://cli:9000");
        assert_eq!(resolved.session_id, "override");
    }

    #[test]
    fn missing_session_id_generates_one() {
        let file = ConfigFile::default();
        let a = ResolvedConfig::resolve(&file, None, None, None, false);
        assert!(a.session_id.ends_with("-console"));
    }

    #[test]
    fn local_config_flag_forces_local_mode() {
        let file = ConfigFile::default();
        let resolved = ResolvedConfig::resolve(&file, None, None, None, true);
        assert!(!resolved.persist_run_config);
    }

    #[test]
    fn default_template_parses() {
        let parsed: ConfigFile = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(parsed.default_profile, "local");
        let profile = parsed.profiles.get("local").unwrap();
        assert!(profile.persist_run_config);
        assert_eq!(profile.agent_id, "punisher");
    }

    #[test]
    fn hand_written_config_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
default_profile = "ops"

[profiles.ops]
endpoint = "https://ops.example.com"
session_id = "ops-main"
persist_run_config = false
"#,
        )
        .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let file: ConfigFile = toml::from_str(&raw).unwrap();
        let resolved = ResolvedConfig::resolve(&file, None, None, None, false);
        assert_eq!(resolved.endpoint, "https://ops.example.com");
        assert_eq!(resolved.session_id, "ops-main");
        assert!(!resolved.persist_run_config);
        // Unset fields fall back to built-ins.
        assert_eq!(resolved.agent_id, "punisher");
    }

    #[test]
    fn profile_temperature_is_clamped_on_resolve() {
        let mut file = ConfigFile::default();
        file.default_profile = "default".to_string();
        file.profiles.insert(
            "default".to_string(),
            Profile {
                temperature: 3.0,
                ..Default::default()
            },
        );
        let resolved = ResolvedConfig::resolve(&file, None, None, None, false);
        assert_eq!(resolved.temperature, 1.0);
    }
}
