//! Subprocess bridge to the `codex` CLI.
//!
//! Each turn spawns `codex exec`, captures its JSONL event stream from
//! stdout, and reduces the stream to a thread id plus a user-facing reply.

use crate::error::RelayError;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Fallback reply keeps at most this many characters of raw process output.
const REPLY_TAIL_CHARS: usize = 3_500;

/// Result of one agent turn, successful or not.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Thread id announced by the agent, if any. Present even on failed
    /// runs so the conversation can still resume where the agent left off.
    pub thread_id: Option<String>,
    pub reply: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Seam between the conversation router and the agent subprocess.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, prompt: &str, cwd: &Path, resume_id: Option<&str>) -> Result<AgentOutcome>;
}

/// How much sandboxing the spawned agent keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassLevel {
    /// Agent defaults, no overrides.
    None,
    /// Pass sandbox/approval overrides as `-c` config flags.
    ConfigOverrides,
    /// `--dangerously-bypass-approvals-and-sandbox`.
    Full,
}

impl BypassLevel {
    /// Map a numeric config level, clamping anything above 2 down to full.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::None,
            1 => Self::ConfigOverrides,
            _ => Self::Full,
        }
    }
}

/// Concrete [`AgentRunner`] that shells out to the `codex` binary.
pub struct CodexCli {
    bin: PathBuf,
    sandbox_mode: String,
    approval_policy: String,
    bypass: BypassLevel,
    timeout: Option<Duration>,
}

impl CodexCli {
    pub fn new(
        bin: impl Into<PathBuf>,
        sandbox_mode: impl Into<String>,
        approval_policy: impl Into<String>,
        bypass: BypassLevel,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            bin: bin.into(),
            sandbox_mode: sandbox_mode.into(),
            approval_policy: approval_policy.into(),
            bypass,
            timeout,
        }
    }

    /// Quote a value as a TOML string for a `-c key="value"` override.
    fn toml_string(value: &str) -> String {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }

    /// Assemble the argv for one turn. Order matters to the CLI: the resume
    /// subcommand and its session id bracket the option flags.
    fn build_args(&self, prompt: &str, resume_id: Option<&str>) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if resume_id.is_some() {
            args.push("resume".to_string());
        }
        if self.bypass == BypassLevel::ConfigOverrides {
            args.push("-c".to_string());
            args.push(format!("sandbox_mode={}", Self::toml_string(&self.sandbox_mode)));
            args.push("-c".to_string());
            args.push(format!(
                "approval_policy={}",
                Self::toml_string(&self.approval_policy)
            ));
        }
        args.push("--json".to_string());
        args.push("--skip-git-repo-check".to_string());
        if self.bypass == BypassLevel::Full {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        }
        if let Some(id) = resume_id {
            args.push(id.to_string());
        }
        args.push(prompt.to_string());
        args
    }
}

// ── Event stream ──

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ExecEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: Option<ExecItem> },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ExecItem {
    #[serde(rename = "agent_message")]
    AgentMessage { text: String },
    #[serde(other)]
    Ignored,
}

/// Reduce the JSONL stdout stream to `(thread_id, reply)`.
///
/// Non-JSON lines (progress noise, partial writes) are skipped. When the
/// stream carries several `thread.started` events the last one wins. The
/// reply joins every completed agent message with a blank line.
fn parse_exec_stream(stdout: &str) -> (Option<String>, String) {
    let mut thread_id = None;
    let mut messages: Vec<String> = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<ExecEvent>(line) else {
            continue;
        };
        match event {
            ExecEvent::ThreadStarted { thread_id: id } => thread_id = Some(id),
            ExecEvent::ItemCompleted {
                item: Some(ExecItem::AgentMessage { text }),
            } => messages.push(text),
            _ => {}
        }
    }

    (thread_id, messages.join("\n\n").trim().to_string())
}

#[async_trait]
impl AgentRunner for CodexCli {
    async fn run(&self, prompt: &str, cwd: &Path, resume_id: Option<&str>) -> Result<AgentOutcome> {
        let args = self.build_args(prompt, resume_id);
        tracing::debug!(bin = %self.bin.display(), cwd = %cwd.display(), resume = resume_id.is_some(), "spawning agent");

        let mut cmd = Command::new(&self.bin);
        cmd.args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawned = cmd.output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, spawned).await {
                Ok(result) => result,
                Err(_) => bail!("agent run exceeded {}s timeout", limit.as_secs()),
            },
            None => spawned.await,
        };

        let output = match output {
            Ok(output) => output,
            // A missing binary is an operator-visible condition, not a crash.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(AgentOutcome {
                    thread_id: None,
                    reply: String::new(),
                    stderr: format!("agent executable not found: {}", self.bin.display()),
                    exit_code: 127,
                });
            }
            Err(e) => {
                return Err(RelayError::AgentInvocation(format!(
                    "failed to spawn {}: {e}",
                    self.bin.display()
                ))
                .into())
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let (thread_id, mut reply) = parse_exec_stream(&stdout);

        if reply.is_empty() {
            // No structured message made it through; surface raw output so
            // the operator gets at least the tail of what happened.
            let merged = format!("{}\n{}", stdout.trim(), stderr.trim());
            let merged = merged.trim();
            reply = if merged.is_empty() {
                "The agent returned no displayable output.".to_string()
            } else {
                crate::util::tail_chars(merged, REPLY_TAIL_CHARS)
            };
        }

        Ok(AgentOutcome {
            thread_id,
            reply,
            stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
