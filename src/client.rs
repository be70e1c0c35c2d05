/// HTTP + SSE transport for the orchestrator API.
///
/// Four request/response endpoints (history, tasks, config read/write,
/// command dispatch) and one long-lived push channel (`/api/events`). The
/// push channel is the only place conversation content arrives — command
/// POSTs are fire-and-forget and their response bodies are never inspected.
use anyhow::Result;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::events::{PushEvent, parse_push_event};
use crate::session::RunConfig;

// ── Wire types ────────────────────────────────────────────────────────────────

/// One row from `GET /api/chat/history`. Role tags are normalized later by
/// the session reducer, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// One row from `GET /api/agents/tasks` — the mission history sidebar.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentTask {
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Startup transcript seed.
    pub async fn history(&self, session_id: &str) -> Result<Vec<HistoryMessage>> {
        let resp = self
            .http
            .get(self.url("/api/chat/history"))
            .query(&[("session_id", session_id)])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Pending mission/task summaries. Polled at startup and re-polled after
    /// every finalized reply.
    pub async fn tasks(&self) -> Result<Vec<AgentTask>> {
        let resp = self
            .http
            .get(self.url("/api/agents/tasks"))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Server-side run configs, one per agent. Used only in Persisted mode.
    pub async fn config(&self, agent_id: &str) -> Result<Option<RunConfig>> {
        let resp = self
            .http
            .get(self.url("/api/agents/config"))
            .send()
            .await?
            .error_for_status()?;
        let configs: Vec<RunConfig> = resp.json().await?;
        Ok(configs.into_iter().find(|c| c.agent_id == agent_id))
    }

    /// Write the full merged run config back. Fire-and-forget from the
    /// reducer's point of view — the caller logs and drops any error.
    pub async fn save_config(&self, config: &RunConfig) -> Result<()> {
        self.http
            .post(self.url("/api/agents/config"))
            .json(config)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Dispatch a user command. The conversation reply arrives on the push
    /// channel; only transport-level success matters here.
    pub async fn send_command(&self, command: &str, session_id: &str) -> Result<()> {
        self.http
            .post(self.url("/api/command"))
            .json(&serde_json::json!({
                "command": command,
                "session_id": session_id,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // ── Push channel ──────────────────────────────────────────────────────────

    /// Subscribe to `/api/events` and forward each parsed push event over
    /// `tx`. Returns the task handle; aborting it releases the subscription
    /// (session teardown). Malformed payloads are logged and skipped. If the
    /// stream drops, the task logs and exits — no reconnect policy, and no
    /// read timeout: a stalled server simply stops delivering events.
    pub fn subscribe(&self, tx: UnboundedSender<PushEvent>) -> JoinHandle<()> {
        let http = self.http.clone();
        let url = self.url("/api/events");

        tokio::spawn(async move {
            let resp = match http.get(&url).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::warn!(status = %r.status(), "event stream rejected");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "event stream connect failed");
                    return;
                }
            };

            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = %e, "event stream dropped");
                        return;
                    }
                };
                let raw = std::str::from_utf8(&bytes).unwrap_or("");

                for event in decode_chunk(&mut buffer, raw) {
                    if tx.send(event).is_err() {
                        // Receiver gone — session torn down.
                        return;
                    }
                }
            }
            tracing::info!("event stream closed by server");
        })
    }
}

/// Append one chunk to the reassembly buffer and decode every complete line
/// it finishes. Chunk boundaries can fall anywhere — inside the `data: `
/// prefix, mid-JSON — so only lines terminated by a newline are framed;
/// everything after the last newline stays buffered for the next chunk.
fn decode_chunk(buffer: &mut String, chunk: &str) -> Vec<PushEvent> {
    buffer.push_str(chunk);
    let Some(newline) = buffer.rfind('\n') else {
        return Vec::new();
    };
    let complete: String = buffer.drain(..=newline).collect();

    let mut events = Vec::new();
    for line in complete.lines() {
        let Some(payload) = frame_data_line(line) else {
            continue;
        };
        match parse_push_event(payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(error = %e, payload, "malformed push event dropped");
            }
        }
    }
    events
}

/// Extract the JSON payload from one SSE line. Blank lines, comment/field
/// lines, and `[DONE]` sentinels are skipped.
fn frame_data_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line == "data: [DONE]" {
        return None;
    }
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_skips_blank_and_done_lines() {
        assert_eq!(frame_data_line(""), None);
        assert_eq!(frame_data_line("   "), None);
        assert_eq!(frame_data_line("data: [DONE]"), None);
    }

    #[test]
    fn frame_strips_data_prefix() {
        assert_eq!(
            frame_data_line("data: {\"type\":\"x\"}"),
            Some("{\"type\":\"x\"}")
        );
        assert_eq!(
            frame_data_line("data:{\"type\":\"x\"}"),
            Some("{\"type\":\"x\"}")
        );
    }

    #[test]
    fn frame_ignores_non_data_lines() {
        assert_eq!(frame_data_line(": keepalive"), None);
        assert_eq!(frame_data_line("event: message"), None);
    }

    #[test]
    fn chunk_split_inside_data_prefix_reassembles() {
        let mut buf = String::new();
        assert!(decode_chunk(&mut buf, "da").is_empty());
        let events = decode_chunk(&mut buf, "ta: {\"type\":\"response\",\"content\":\"hi\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "response");
        assert_eq!(events[0].normalized_content(), "hi");
        assert!(buf.is_empty());
    }

    #[test]
    fn chunk_split_mid_json_reassembles() {
        let mut buf = String::new();
        assert!(decode_chunk(&mut buf, "data: {\"type\":\"resp").is_empty());
        let events = decode_chunk(&mut buf, "onse\",\"content\":\"x\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "response");
    }

    #[test]
    fn complete_lines_decode_and_partial_tail_stays_buffered() {
        let mut buf = String::new();
        let events = decode_chunk(
            &mut buf,
            "data: {\"type\":\"status\",\"content\":\"a\"}\ndata: {\"type\":\"status\",\"content\":\"b\"}\ndata: {\"ty",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(buf, "data: {\"ty");

        let events = decode_chunk(&mut buf, "pe\":\"status\",\"content\":\"c\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].normalized_content(), "c");
    }

    #[test]
    fn malformed_complete_line_is_dropped_not_buffered() {
        let mut buf = String::new();
        let events = decode_chunk(
            &mut buf,
            "data: {not json}\ndata: {\"type\":\"status\",\"content\":\"ok\"}\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].normalized_content(), "ok");
        assert!(buf.is_empty());
    }
}
