//! Error taxonomy for the relay core.
//!
//! Three kinds of failure cross component boundaries: bad user input (always
//! reported back to the user, never escalated), unreadable persisted data
//! (degraded to empty and logged), and agent invocation failures (reported
//! with diagnostic context, router keeps serving). Protocol parse noise from
//! the subprocess stream never becomes an error at all: malformed lines are
//! skipped at the point of decoding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad selector, out-of-range index, unknown session, invalid directory.
    /// The message is shown to the end user verbatim.
    #[error("{0}")]
    Input(String),

    /// Unreadable or corrupt log/state data. Callers degrade to an empty
    /// result; the user sees at most "not found".
    #[error("storage error: {0}")]
    Storage(String),

    /// Subprocess-level failure not expressible as an exit code.
    #[error("agent invocation failed: {0}")]
    AgentInvocation(String),
}

impl RelayError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_displays_message_verbatim() {
        let err = RelayError::input("pick a number from the list");
        assert_eq!(err.to_string(), "pick a number from the list");
    }

    #[test]
    fn storage_error_is_prefixed() {
        let err = RelayError::Storage("bad state file".into());
        assert!(err.to_string().starts_with("storage error:"));
    }
}
