/// Push-event classification.
///
/// The orchestrator pushes a heterogeneous stream of JSON events over one SSE
/// channel: finalized chat replies, intermediate status lines, and raw intel
/// tape output all arrive interleaved. This module decides, per event, which
/// of the three it is. The session reducer (`session.rs`) consumes the
/// verdict; nothing downstream ever looks at the raw payload again.
use serde::Deserialize;
use serde_json::Value;

// ── Wire type ─────────────────────────────────────────────────────────────────

/// One message from the push channel, as sent by the orchestrator.
/// `content` is usually a plain string but some emitters send structured
/// values (position snapshots, wallet summaries).
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

/// Event type tag marking a finalized reply (ends the thinking interval).
pub const RESPONSE_TYPE: &str = "response";

// ── Markers ───────────────────────────────────────────────────────────────────

/// Intel tape markers. Any of these routes the event to the telemetry feed
/// instead of the transcript. The bracket markers are stripped from the
/// displayed line; the ticker marker (`BTC:`) is kept verbatim.
const INTEL_MARKERS: [&str; 3] = ["[POS]", "[WALLET]", "[TRADE]"];
const TICKER_MARKER: &str = "BTC:";

/// Status marker emitted while the orchestrator is gathering intel.
/// Disjoint from the telemetry markers above — telemetry is checked first,
/// and neither marker set can appear inside the other's messages.
const THINKING_MARKER: &str = "PUNISHER IS THINKING";
const THINKING_PREFIX: &str = "PUNISHER IS THINKING... ";

// ── Classification ────────────────────────────────────────────────────────────

/// Verdict for one push event. Exactly one variant per event; the checks are
/// evaluated in declaration order and short-circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Intel tape line, markers already stripped and trimmed.
    Telemetry(String),
    /// Thinking status update with the derived step label.
    Thinking { label: String },
    /// Assistant utterance. `finalized` is true for `type == "response"`,
    /// which additionally clears the thinking indicator.
    Reply { text: String, finalized: bool },
}

impl PushEvent {
    /// Normalize `content` to the single string every later stage inspects.
    /// Plain strings pass through verbatim; anything structured is rendered
    /// as indented JSON so it stays readable in the transcript or tape.
    pub fn normalized_content(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }

    pub fn classify(&self) -> Classified {
        let text = self.normalized_content();

        if is_telemetry(&text) {
            return Classified::Telemetry(strip_intel_markers(&text));
        }

        if text.contains(THINKING_MARKER) {
            return Classified::Thinking {
                label: thinking_label(&text),
            };
        }

        Classified::Reply {
            text,
            finalized: self.kind == RESPONSE_TYPE,
        }
    }
}

fn is_telemetry(text: &str) -> bool {
    INTEL_MARKERS.iter().any(|m| text.contains(m)) || text.contains(TICKER_MARKER)
}

/// Remove every occurrence of the bracket markers, then trim.
fn strip_intel_markers(text: &str) -> String {
    let mut out = text.to_string();
    for marker in INTEL_MARKERS {
        out = out.replace(marker, "");
    }
    out.trim().to_string()
}

/// Derive the thinking step label: drop the marker prefix and any literal
/// brackets. "PUNISHER IS THINKING... [SCANNING]" → "SCANNING".
fn thinking_label(text: &str) -> String {
    let rest = text
        .split_once(THINKING_PREFIX)
        .map(|(_, tail)| tail)
        .unwrap_or_else(|| text.trim_start_matches(THINKING_MARKER));
    rest.replace(['[', ']'], "").trim().to_string()
}

/// Parse one SSE `data:` payload. Unparsable payloads are the caller's cue to
/// log and drop the message — never an error surfaced to the user.
pub fn parse_push_event(data: &str) -> Result<PushEvent, serde_json::Error> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, content: Value) -> PushEvent {
        PushEvent {
            kind: kind.to_string(),
            content,
        }
    }

    #[test]
    fn trade_marker_routes_to_telemetry() {
        let ev = event("status", Value::String("[TRADE] BUY 0.5 @ 64200".into()));
        assert_eq!(
            ev.classify(),
            Classified::Telemetry("BUY 0.5 @ 64200".to_string())
        );
    }

    #[test]
    fn all_bracket_markers_are_stripped() {
        let ev = event(
            "status",
            Value::String("[POS] [WALLET] 0xabc Value: $1,204,000".into()),
        );
        assert_eq!(
            ev.classify(),
            Classified::Telemetry("0xabc Value: $1,204,000".to_string())
        );
    }

    #[test]
    fn ticker_marker_is_telemetry_but_kept_verbatim() {
        let ev = event("status", Value::String("BTC: $64,123.00".into()));
        assert_eq!(
            ev.classify(),
            Classified::Telemetry("BTC: $64,123.00".to_string())
        );
    }

    #[test]
    fn thinking_marker_yields_label() {
        let ev = event(
            "status",
            Value::String("PUNISHER IS THINKING... [SCANNING]".into()),
        );
        assert_eq!(
            ev.classify(),
            Classified::Thinking {
                label: "SCANNING".to_string()
            }
        );
    }

    #[test]
    fn thinking_without_prefix_still_strips_brackets() {
        let ev = event("status", Value::String("PUNISHER IS THINKING".into()));
        assert_eq!(
            ev.classify(),
            Classified::Thinking {
                label: String::new()
            }
        );
    }

    #[test]
    fn response_type_is_finalized_reply() {
        let ev = event(RESPONSE_TYPE, Value::String("Target acquired.".into()));
        assert_eq!(
            ev.classify(),
            Classified::Reply {
                text: "Target acquired.".to_string(),
                finalized: true,
            }
        );
    }

    #[test]
    fn other_types_are_non_final_replies() {
        let ev = event("note", Value::String("Standing by.".into()));
        assert_eq!(
            ev.classify(),
            Classified::Reply {
                text: "Standing by.".to_string(),
                finalized: false,
            }
        );
    }

    #[test]
    fn structured_content_is_pretty_printed() {
        let ev = event(RESPONSE_TYPE, serde_json::json!({"pnl": 42.5}));
        let text = ev.normalized_content();
        assert!(text.contains("\"pnl\""));
        assert!(text.contains('\n'), "expected indented JSON, got {text:?}");
    }

    #[test]
    fn telemetry_wins_over_reply_for_structured_content() {
        // Marker inside a structured value still routes to the tape.
        let ev = event("status", serde_json::json!({"raw": "[POS] BTC long"}));
        assert!(matches!(ev.classify(), Classified::Telemetry(_)));
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(parse_push_event("{not json").is_err());
        assert!(parse_push_event("").is_err());
    }

    #[test]
    fn missing_fields_default() {
        let ev = parse_push_event("{}").unwrap();
        assert_eq!(ev.kind, "");
        assert!(matches!(ev.classify(), Classified::Reply { finalized: false, .. }));
    }
}
