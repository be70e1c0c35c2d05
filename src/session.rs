/// Session state reducer.
///
/// Owns everything the console displays: the transcript, the thinking
/// indicator, the intel tape, and the run configuration. All mutation goes
/// through the methods here, on the single control thread — the TUI loop
/// feeds in push events, user commands, and request completions one at a
/// time, and each one fully applies before the next is considered.
///
/// The reducer never performs I/O. Anything that needs the network comes back
/// to the caller as an `Effect` to run; request completions re-enter via
/// `dispatch_done` / `dispatch_failed`. This keeps the whole state machine
/// testable without a server.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::events::{Classified, PushEvent};

/// Intel tape cap: one incoming line plus fifty retained.
const INTEL_CAP: usize = 51;

/// Thinking label shown between submit and the first status push.
const UPLINK_LABEL: &str = "UPLINKING";

// ── Data model ────────────────────────────────────────────────────────────────

/// Closed role set. The wire is sloppy — history rows arrive as "user",
/// "assistant", or "model" depending on which backend wrote them — so tags
/// are normalized here at the edge and nothing downstream ever compares
/// strings again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "user" => Role::User,
            _ => Role::Assistant,
        }
    }
}

/// One transcript entry. Never mutated after creation, never deleted within
/// a session.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Local wall-clock "HH:MM" at creation.
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThinkingStatus {
    pub active: bool,
    pub label: String,
}

/// Run-time generation parameters, edited from the settings panel.
/// Also the wire shape for `GET`/`POST /api/agents/config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub agent_id: String,
    pub system_prompt: String,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            agent_id: "punisher".to_string(),
            system_prompt: String::new(),
            temperature: 0.7,
            top_p: None,
            top_k: None,
        }
    }
}

/// Field-level patch for `update_config`. Only set fields change.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub agent_id: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
}

/// Where edited run settings go. Both behaviors shipped in the original
/// dashboard at different points; the profile picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Every merge fires a write of the full RunConfig back to the server.
    /// Local state stays authoritative — a failed write is logged, not
    /// rolled back.
    Persisted,
    /// Pure local UI state, never sent anywhere.
    LocalOnly,
}

// ── Effects ───────────────────────────────────────────────────────────────────

/// I/O the caller must perform after a reducer step.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// POST the command to the orchestrator. Fire-and-forget; the reply
    /// arrives later on the push channel, not in the HTTP response.
    Dispatch { command: String, session_id: String },
    /// Re-poll pending task summaries. Best-effort — a failure here must
    /// never touch chat state.
    RefreshTasks,
    /// Persist the merged run config (Persisted mode only).
    SaveConfig(RunConfig),
}

// ── SessionState ──────────────────────────────────────────────────────────────

pub struct SessionState {
    /// Opaque conversation id, attached to every outbound command.
    pub session_id: String,
    /// Append-only, insertion order = arrival order.
    pub transcript: Vec<ChatTurn>,
    pub thinking: ThinkingStatus,
    /// Intel tape, most-recent-first, capped at `INTEL_CAP`.
    pub intel: VecDeque<String>,
    pub run_config: RunConfig,
    pub config_mode: ConfigMode,
    /// True between a Dispatch effect being emitted and its completion
    /// callback. Part of the double-submit guard alongside `thinking.active`.
    dispatch_inflight: bool,
    /// Monotonic turn id counter.
    next_turn: u64,
    /// Set whenever the transcript grows; the view layer consumes it to
    /// scroll to the bottom instead of the reducer driving the screen.
    scroll_pending: bool,
}

impl SessionState {
    pub fn new(session_id: String, run_config: RunConfig, config_mode: ConfigMode) -> Self {
        Self {
            session_id,
            transcript: Vec::new(),
            thinking: ThinkingStatus::default(),
            intel: VecDeque::new(),
            run_config,
            config_mode,
            dispatch_inflight: false,
            next_turn: 0,
            scroll_pending: false,
        }
    }

    /// Busy = a command is in flight or the orchestrator reported thinking.
    /// Submissions while busy are silent no-ops.
    pub fn busy(&self) -> bool {
        self.thinking.active || self.dispatch_inflight
    }

    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_pending)
    }

    // ── Push-channel events ───────────────────────────────────────────────────

    /// Apply one push event. Exactly one classification rule fires; the
    /// returned effects are everything the caller must still do.
    pub fn apply(&mut self, event: &PushEvent) -> Vec<Effect> {
        self.apply_classified(event.classify())
    }

    /// Apply an already-classified event. Callers that also display the
    /// verdict (the single-shot path) classify once and pass it in, so the
    /// printed line and the state transition can never disagree.
    pub fn apply_classified(&mut self, verdict: Classified) -> Vec<Effect> {
        match verdict {
            Classified::Telemetry(line) => {
                self.intel.push_front(line);
                self.intel.truncate(INTEL_CAP);
                Vec::new()
            }
            Classified::Thinking { label } => {
                self.thinking = ThinkingStatus {
                    active: true,
                    label,
                };
                Vec::new()
            }
            Classified::Reply { text, finalized } => {
                self.push_turn(Role::Assistant, text);
                if finalized {
                    self.thinking = ThinkingStatus::default();
                    self.dispatch_inflight = false;
                    vec![Effect::RefreshTasks]
                } else {
                    Vec::new()
                }
            }
        }
    }

    // ── Command dispatch ──────────────────────────────────────────────────────

    /// Submit a user command. Returns the dispatch effect if accepted,
    /// `None` when the text is blank or the session is busy.
    pub fn submit(&mut self, text: &str) -> Option<Effect> {
        let text = text.trim();
        if text.is_empty() || self.busy() {
            return None;
        }

        self.push_turn(Role::User, text.to_string());
        self.thinking = ThinkingStatus {
            active: true,
            label: UPLINK_LABEL.to_string(),
        };
        self.dispatch_inflight = true;

        Some(Effect::Dispatch {
            command: text.to_string(),
            session_id: self.session_id.clone(),
        })
    }

    /// The POST itself completed. The reply still arrives via the push
    /// channel; thinking stays active until a finalized event clears it.
    pub fn dispatch_done(&mut self) {
        self.dispatch_inflight = false;
    }

    /// The POST failed. Surface the failure in the transcript as a synthetic
    /// assistant turn — indistinguishable from a normal one in the data model.
    pub fn dispatch_failed(&mut self, detail: &str) {
        self.dispatch_inflight = false;
        self.thinking = ThinkingStatus::default();
        self.push_turn(Role::Assistant, format!("CRITICAL ERROR: {detail}"));
    }

    // ── Run configuration ─────────────────────────────────────────────────────

    /// Field-level merge over the current run config. Numeric sliders are
    /// clamped here rather than trusting the input surface.
    pub fn update_config(&mut self, patch: ConfigPatch) -> Option<Effect> {
        if let Some(agent_id) = patch.agent_id {
            self.run_config.agent_id = agent_id;
        }
        if let Some(prompt) = patch.system_prompt {
            self.run_config.system_prompt = prompt;
        }
        if let Some(t) = patch.temperature {
            self.run_config.temperature = t.clamp(0.0, 1.0);
        }
        if let Some(p) = patch.top_p {
            self.run_config.top_p = Some(p.clamp(0.0, 1.0));
        }
        if let Some(k) = patch.top_k {
            self.run_config.top_k = Some(k);
        }

        match self.config_mode {
            ConfigMode::Persisted => Some(Effect::SaveConfig(self.run_config.clone())),
            ConfigMode::LocalOnly => None,
        }
    }

    /// Replace the run config wholesale with the server copy (startup fetch
    /// in Persisted mode). Does not trigger a write-back.
    pub fn adopt_config(&mut self, config: RunConfig) {
        self.run_config = config;
    }

    // ── History seeding ───────────────────────────────────────────────────────

    /// Seed the transcript from the startup history fetch. `(role, content)`
    /// pairs in server order; role tags normalized at this edge.
    pub fn seed_history<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (role, content) in items {
            self.push_turn(Role::from_wire(&role), content);
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn push_turn(&mut self, role: Role, content: String) {
        let id = format!("turn-{}", self.next_turn);
        self.next_turn += 1;
        self.transcript.push(ChatTurn {
            id,
            role,
            content,
            timestamp: local_clock(),
        });
        self.scroll_pending = true;
    }
}

/// Local time as "HH:MM", matching the transcript header format.
fn local_clock() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn state() -> SessionState {
        SessionState::new(
            "ops-session-1".to_string(),
            RunConfig::default(),
            ConfigMode::LocalOnly,
        )
    }

    fn push(kind: &str, content: &str) -> PushEvent {
        PushEvent {
            kind: kind.to_string(),
            content: Value::String(content.to_string()),
        }
    }

    #[test]
    fn trade_event_only_touches_the_tape() {
        let mut s = state();
        let effects = s.apply(&push("status", "[TRADE] SELL 1.2 @ 63900"));

        assert!(effects.is_empty());
        assert_eq!(s.intel.len(), 1);
        assert_eq!(s.intel[0], "SELL 1.2 @ 63900");
        assert!(s.transcript.is_empty());
        assert!(!s.thinking.active);
    }

    #[test]
    fn thinking_event_sets_label_without_transcript_change() {
        let mut s = state();
        s.apply(&push("status", "PUNISHER IS THINKING... [SCANNING]"));

        assert_eq!(
            s.thinking,
            ThinkingStatus {
                active: true,
                label: "SCANNING".to_string()
            }
        );
        assert!(s.transcript.is_empty());
    }

    #[test]
    fn finalized_reply_appends_turn_and_clears_thinking() {
        let mut s = state();
        s.apply(&push("status", "PUNISHER IS THINKING... [GATHERING INTEL]"));
        let effects = s.apply(&push("response", "Target acquired."));

        assert_eq!(effects, vec![Effect::RefreshTasks]);
        assert_eq!(s.transcript.len(), 1);
        assert_eq!(s.transcript[0].role, Role::Assistant);
        assert_eq!(s.transcript[0].content, "Target acquired.");
        assert_eq!(s.thinking, ThinkingStatus::default());
    }

    #[test]
    fn non_final_reply_keeps_thinking_active() {
        let mut s = state();
        s.apply(&push("status", "PUNISHER IS THINKING... [SCANNING]"));
        let effects = s.apply(&push("note", "Partial intel inbound."));

        assert!(effects.is_empty());
        assert_eq!(s.transcript.len(), 1);
        assert!(s.thinking.active);
    }

    #[test]
    fn intel_tape_caps_at_fifty_one_most_recent_first() {
        let mut s = state();
        for i in 0..60 {
            s.apply(&push("status", &format!("[TRADE] fill {i}")));
        }

        assert_eq!(s.intel.len(), 51);
        assert_eq!(s.intel[0], "fill 59");
        // The oldest retained entry is the 10th fed (index 9).
        assert_eq!(s.intel[50], "fill 9");
    }

    #[test]
    fn submit_appends_user_turn_and_emits_dispatch() {
        let mut s = state();
        let effect = s.submit("  assess BTC exposure  ");

        assert_eq!(
            effect,
            Some(Effect::Dispatch {
                command: "assess BTC exposure".to_string(),
                session_id: "ops-session-1".to_string(),
            })
        );
        assert_eq!(s.transcript.len(), 1);
        assert_eq!(s.transcript[0].role, Role::User);
        assert_eq!(s.transcript[0].content, "assess BTC exposure");
        assert_eq!(s.thinking.label, "UPLINKING");
        assert!(s.busy());
    }

    #[test]
    fn blank_submit_is_a_noop() {
        let mut s = state();
        assert_eq!(s.submit("   "), None);
        assert!(s.transcript.is_empty());
        assert!(!s.busy());
    }

    #[test]
    fn submit_while_thinking_is_a_noop() {
        let mut s = state();
        s.apply(&push("status", "PUNISHER IS THINKING... [SCANNING]"));
        assert_eq!(s.submit("second command"), None);
        assert!(s.transcript.is_empty());
    }

    #[test]
    fn submit_while_dispatch_outstanding_is_a_noop() {
        let mut s = state();
        s.submit("first").unwrap();
        // Simulate the push channel clearing thinking before the POST returns.
        s.thinking = ThinkingStatus::default();
        assert_eq!(s.submit("second"), None);
        assert_eq!(s.transcript.len(), 1);
    }

    #[test]
    fn dispatch_done_releases_the_guard() {
        let mut s = state();
        s.submit("first").unwrap();
        s.thinking = ThinkingStatus::default();
        s.dispatch_done();
        assert!(s.submit("second").is_some());
    }

    #[test]
    fn dispatch_failure_appends_exactly_one_error_turn() {
        let mut s = state();
        s.submit("deploy").unwrap();
        s.dispatch_failed("connection refused");

        assert_eq!(s.transcript.len(), 2);
        let last = s.transcript.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("connection refused"));
        assert_eq!(s.thinking, ThinkingStatus::default());
        assert!(!s.busy());
    }

    #[test]
    fn config_merge_is_field_level() {
        let mut s = state();
        s.update_config(ConfigPatch {
            temperature: Some(0.3),
            ..Default::default()
        });
        s.update_config(ConfigPatch {
            system_prompt: Some("X".to_string()),
            ..Default::default()
        });

        assert_eq!(s.run_config.temperature, 0.3);
        assert_eq!(s.run_config.system_prompt, "X");
    }

    #[test]
    fn temperature_and_top_p_are_clamped() {
        let mut s = state();
        s.update_config(ConfigPatch {
            temperature: Some(1.8),
            top_p: Some(-0.2),
            ..Default::default()
        });
        assert_eq!(s.run_config.temperature, 1.0);
        assert_eq!(s.run_config.top_p, Some(0.0));
    }

    #[test]
    fn persisted_mode_emits_save_local_mode_does_not() {
        let mut local = state();
        assert_eq!(
            local.update_config(ConfigPatch {
                temperature: Some(0.5),
                ..Default::default()
            }),
            None
        );

        let mut persisted = SessionState::new(
            "s".to_string(),
            RunConfig::default(),
            ConfigMode::Persisted,
        );
        let effect = persisted.update_config(ConfigPatch {
            temperature: Some(0.5),
            ..Default::default()
        });
        match effect {
            Some(Effect::SaveConfig(cfg)) => assert_eq!(cfg.temperature, 0.5),
            other => panic!("expected SaveConfig, got {other:?}"),
        }
    }

    #[test]
    fn history_roles_are_normalized_at_the_edge() {
        let mut s = state();
        s.seed_history(vec![
            ("user".to_string(), "status report".to_string()),
            ("model".to_string(), "All quiet.".to_string()),
            ("assistant".to_string(), "Standing by.".to_string()),
        ]);

        assert_eq!(s.transcript.len(), 3);
        assert_eq!(s.transcript[0].role, Role::User);
        assert_eq!(s.transcript[1].role, Role::Assistant);
        assert_eq!(s.transcript[2].role, Role::Assistant);
    }

    #[test]
    fn turn_ids_are_unique() {
        let mut s = state();
        s.seed_history(vec![
            ("user".to_string(), "a".to_string()),
            ("model".to_string(), "b".to_string()),
        ]);
        s.submit("c").unwrap();

        let mut ids: Vec<_> = s.transcript.iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), s.transcript.len());
    }

    #[test]
    fn pre_classified_events_transition_like_raw_ones() {
        let mut raw = state();
        let mut pre = state();
        let ev = push("response", "Target acquired.");

        let effects_raw = raw.apply(&ev);
        let effects_pre = pre.apply_classified(ev.classify());

        assert_eq!(effects_raw, effects_pre);
        assert_eq!(pre.transcript.len(), 1);
        assert_eq!(pre.transcript[0].content, "Target acquired.");
        assert!(!pre.thinking.active);
    }

    #[test]
    fn transcript_growth_requests_a_scroll() {
        let mut s = state();
        assert!(!s.take_scroll_request());
        s.apply(&push("response", "done"));
        assert!(s.take_scroll_request());
        assert!(!s.take_scroll_request());
    }
}
