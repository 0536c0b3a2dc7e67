//! Session log record shapes and the derived metadata types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Role of a transcript participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One user-or-assistant message extracted from a conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

/// Metadata derived from a session log file.
///
/// Recomputed from the file on every lookup; never cached beyond one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMeta {
    pub session_id: String,
    /// Log-internal creation timestamp, `"unknown"` when absent.
    pub timestamp: String,
    /// Working directory recorded by the agent, `"unknown"` when absent.
    pub cwd: String,
    pub log_path: PathBuf,
    /// Derived from the first user message, one line, at most 46 chars.
    pub title: String,
}

impl ConversationMeta {
    /// Leading eight characters of the session id, for compact display.
    pub fn short_id(&self) -> &str {
        let end = self
            .session_id
            .char_indices()
            .nth(8)
            .map_or(self.session_id.len(), |(i, _)| i);
        &self.session_id[..end]
    }

    /// Final path component of the recorded working directory.
    pub fn cwd_basename(&self) -> &str {
        self.cwd.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(&self.cwd)
    }
}

// ── Log records ──────────────────────────────────────────────────

/// One line of a session log, keyed on the `type` discriminator.
///
/// Unknown record types decode as `Ignored` instead of failing; per-line
/// decode failures are skipped by the callers.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum LogRecord {
    #[serde(rename = "session_meta")]
    SessionMeta { payload: Option<SessionMetaPayload> },
    #[serde(rename = "event_msg")]
    EventMsg { payload: Option<EventMsgPayload> },
    #[serde(other)]
    Ignored,
}

/// Payload of the `session_meta` record heading every log file.
///
/// Every field is optional and defaulted; logs from other agent versions may
/// omit any of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetaPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub originator: Option<String>,
}

/// Payload of an `event_msg` record. Only `user_message` and `agent_message`
/// kinds carry transcript text; everything else is skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMsgPayload {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl EventMsgPayload {
    /// Transcript role for this event, when it is a transcript message at all.
    pub fn role(&self) -> Option<Role> {
        match self.kind.as_deref() {
            Some("user_message") => Some(Role::User),
            Some("agent_message") => Some(Role::Assistant),
            _ => None,
        }
    }
}
