//! Conversation routing: slash commands, session selection, and agent turns.

pub mod selector;

use crate::bridge::AgentRunner;
use crate::channels::traits::{ChannelAdapter, Choice, InboundMessage};
use crate::error::RelayError;
use crate::session::SessionIndex;
use crate::state::StateStore;
use crate::util::{compact_one_line, tail_chars};

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// History entries are compacted to one line of this many characters.
const HISTORY_LINE_CHARS: usize = 320;
/// Stderr shown after a failed agent run keeps at most this many characters.
const STDERR_TAIL_CHARS: usize = 1_200;
const SESSIONS_DEFAULT: usize = 10;
const SESSIONS_MAX: usize = 30;
const HISTORY_DEFAULT: usize = 10;
const HISTORY_MAX: usize = 50;

const HELP_TEXT: &str = "\
I bridge this chat to a local coding agent.

/sessions [n] - list recent local sessions
/use <number|id> - switch the conversation to a session
/history [number|id] [n] - show recent transcript lines
/new [dir] - start fresh, optionally in another directory
/status - show the active session and working directory
/ask <text> - send text that starts with a slash
/help - this message

Anything else you type goes straight to the agent.";

/// Routes normalized inbound messages to command handlers or agent turns.
pub struct Router {
    sessions: SessionIndex,
    state: StateStore,
    agent: Arc<dyn AgentRunner>,
    default_cwd: PathBuf,
}

/// Keeps the surface's "working on it" indicator alive for the duration of
/// an agent run, and stops it on every exit path.
struct TypingGuard {
    handle: JoinHandle<()>,
}

impl TypingGuard {
    fn spawn(adapter: Arc<dyn ChannelAdapter>, target: String) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                if adapter.typing(&target).await.is_err() {
                    break;
                }
                // Surfaces expire the indicator after ~5s; refresh early.
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        Self { handle }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl Router {
    pub fn new(
        sessions: SessionIndex,
        state: StateStore,
        agent: Arc<dyn AgentRunner>,
        default_cwd: PathBuf,
    ) -> Self {
        Self {
            sessions,
            state,
            agent,
            default_cwd,
        }
    }

    /// Entry point for one inbound message. Errors from handlers classified
    /// as user input problems are sent back as chat text; everything else
    /// propagates to the transport pump for logging.
    pub async fn handle_message(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        msg: &InboundMessage,
    ) -> Result<()> {
        let result = self.dispatch(adapter.clone(), msg).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => match e.downcast::<RelayError>() {
                Ok(RelayError::Input(text)) => {
                    adapter.send_text(&msg.target, &text).await?;
                    Ok(())
                }
                Ok(other) => Err(other.into()),
                Err(e) => Err(e),
            },
        }
    }

    async fn dispatch(&self, adapter: Arc<dyn ChannelAdapter>, msg: &InboundMessage) -> Result<()> {
        let text = msg.text.trim();
        if text.is_empty() {
            return Ok(());
        }

        if let Some((command, arg)) = parse_command(text) {
            tracing::info!(actor = %msg.actor, command = %command, "command received");
            return match command.as_str() {
                "start" | "help" => self.cmd_help(adapter.as_ref(), msg).await,
                "sessions" => self.cmd_sessions(adapter.as_ref(), msg, &arg).await,
                "use" => self.cmd_use(adapter.as_ref(), msg, &arg).await,
                "history" => self.cmd_history(adapter.as_ref(), msg, &arg).await,
                "new" => self.cmd_new(adapter.as_ref(), msg, &arg).await,
                "status" => self.cmd_status(adapter.as_ref(), msg).await,
                "ask" => {
                    if arg.is_empty() {
                        Err(RelayError::input("Usage: /ask <text for the agent>").into())
                    } else {
                        self.run_prompt_turn(adapter, msg, &arg).await
                    }
                }
                _ => {
                    adapter
                        .send_text(
                            &msg.target,
                            &format!("Unknown command /{command}. Try /help."),
                        )
                        .await
                }
            };
        }

        // A bare number right after a /sessions listing picks from it.
        if self.try_quick_pick(adapter.as_ref(), msg, text).await? {
            return Ok(());
        }

        self.run_prompt_turn(adapter, msg, text).await
    }

    async fn cmd_help(&self, adapter: &dyn ChannelAdapter, msg: &InboundMessage) -> Result<()> {
        adapter.send_text(&msg.target, HELP_TEXT).await
    }

    async fn cmd_sessions(
        &self,
        adapter: &dyn ChannelAdapter,
        msg: &InboundMessage,
        arg: &str,
    ) -> Result<()> {
        let limit = parse_count(arg, SESSIONS_DEFAULT, SESSIONS_MAX);
        let list = self.sessions.list_recent(limit);
        if list.is_empty() {
            return adapter
                .send_text(&msg.target, "No local sessions found.")
                .await;
        }

        let mut lines = vec!["Recent sessions (reply with a number to switch):".to_string()];
        let mut choices = Vec::new();
        for (i, meta) in list.iter().enumerate() {
            lines.push(format!(
                "{}. {} | {} | {}",
                i + 1,
                meta.title,
                meta.short_id(),
                meta.cwd_basename()
            ));
            choices.push(Choice {
                label: format!("Switch {}", i + 1),
                data: format!("use:{}", meta.session_id),
            });
        }

        let ids = list.iter().map(|m| m.session_id.clone()).collect();
        self.state.set_last_session_ids(&msg.actor, ids)?;
        adapter
            .send_choices(&msg.target, &lines.join("\n"), &choices)
            .await
    }

    async fn cmd_use(
        &self,
        adapter: &dyn ChannelAdapter,
        msg: &InboundMessage,
        arg: &str,
    ) -> Result<()> {
        let session_id = selector::resolve_selector(&self.state, &msg.actor, arg)?;
        self.switch_to_session(adapter, msg, &session_id).await
    }

    async fn switch_to_session(
        &self,
        adapter: &dyn ChannelAdapter,
        msg: &InboundMessage,
        session_id: &str,
    ) -> Result<()> {
        let Some(meta) = self.sessions.find_by_id(session_id) else {
            return adapter
                .send_text(&msg.target, &format!("Session not found: {session_id}"))
                .await;
        };

        self.state
            .set_active_session(&msg.actor, &meta.session_id, Some(&meta.cwd))?;
        self.state.set_pending_pick(&msg.actor, false)?;
        tracing::info!(actor = %msg.actor, session = %meta.session_id, "session switched");

        adapter
            .send_text(
                &msg.target,
                &format!(
                    "Switched to session:\n{}\nid: {}\ncwd: {}",
                    meta.title, meta.session_id, meta.cwd
                ),
            )
            .await
    }

    /// A bare number while a pick is pending selects from the last listing
    /// instead of going to the agent. Returns true when handled here.
    async fn try_quick_pick(
        &self,
        adapter: &dyn ChannelAdapter,
        msg: &InboundMessage,
        text: &str,
    ) -> Result<bool> {
        if !self.state.is_pending_pick(&msg.actor) {
            return Ok(false);
        }
        if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
            // Any other message ends the pick window.
            self.state.set_pending_pick(&msg.actor, false)?;
            return Ok(false);
        }

        match selector::resolve_selector(&self.state, &msg.actor, text) {
            Ok(session_id) => {
                self.switch_to_session(adapter, msg, &session_id).await?;
                Ok(true)
            }
            Err(RelayError::Input(text)) => {
                adapter.send_text(&msg.target, &text).await?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cmd_history(
        &self,
        adapter: &dyn ChannelAdapter,
        msg: &InboundMessage,
        arg: &str,
    ) -> Result<()> {
        // /history [selector] [n]; a lone token is always the selector, so
        // a bare digit indexes the last listing like it does for /use.
        let mut tokens = arg.split_whitespace();
        let selector_token = tokens.next();
        let count_token = tokens.next();

        let session_id = match selector_token {
            Some(token) => selector::resolve_selector(&self.state, &msg.actor, token)?,
            None => match self.state.get_active(&msg.actor).0 {
                Some(id) => id,
                None => {
                    return Err(RelayError::input(
                        "No active session. Pick one with /use first, or name it: /history <number|id>",
                    )
                    .into());
                }
            },
        };

        let limit = parse_count(count_token.unwrap_or(""), HISTORY_DEFAULT, HISTORY_MAX);
        let Some((meta, entries)) = self.sessions.get_history(&session_id, limit) else {
            return adapter
                .send_text(&msg.target, &format!("Session not found: {session_id}"))
                .await;
        };

        if entries.is_empty() {
            return adapter
                .send_text(
                    &msg.target,
                    &format!("No transcript yet for {}.", meta.title),
                )
                .await;
        }

        let mut lines = vec![format!("History for {} ({}):", meta.title, meta.short_id())];
        for (i, entry) in entries.iter().enumerate() {
            lines.push(format!(
                "{}. [{}] {}",
                i + 1,
                entry.role.label(),
                compact_one_line(&entry.text, HISTORY_LINE_CHARS)
            ));
        }
        adapter.send_text(&msg.target, &lines.join("\n")).await
    }

    async fn cmd_new(
        &self,
        adapter: &dyn ChannelAdapter,
        msg: &InboundMessage,
        arg: &str,
    ) -> Result<()> {
        let cwd = if arg.is_empty() {
            None
        } else {
            let expanded = shellexpand::tilde(arg).into_owned();
            if !Path::new(&expanded).is_dir() {
                return Err(
                    RelayError::input(format!("Not a directory: {expanded}")).into(),
                );
            }
            Some(expanded)
        };

        self.state.clear_active_session(&msg.actor, cwd.as_deref())?;
        let effective = self.effective_cwd(&msg.actor);
        adapter
            .send_text(
                &msg.target,
                &format!(
                    "Starting fresh. The next message opens a new session in {}.",
                    effective.display()
                ),
            )
            .await
    }

    async fn cmd_status(&self, adapter: &dyn ChannelAdapter, msg: &InboundMessage) -> Result<()> {
        let (active, _) = self.state.get_active(&msg.actor);
        let cwd = self.effective_cwd(&msg.actor);
        let text = match active {
            Some(id) => match self.sessions.find_by_id(&id) {
                Some(meta) => format!(
                    "Active session: {}\nid: {}\ncwd: {}",
                    meta.title,
                    meta.session_id,
                    cwd.display()
                ),
                None => format!(
                    "Active session id {} no longer has a log on disk.\ncwd: {}",
                    id,
                    cwd.display()
                ),
            },
            None => format!(
                "No active session. The next message starts a new one in {}.",
                cwd.display()
            ),
        };
        adapter.send_text(&msg.target, &text).await
    }

    /// Working directory for the next run: the actor's chosen cwd when it
    /// still exists, the global default otherwise.
    fn effective_cwd(&self, actor: &str) -> PathBuf {
        if let (_, Some(cwd)) = self.state.get_active(actor) {
            let path = PathBuf::from(&cwd);
            if path.is_dir() {
                return path;
            }
            tracing::warn!(actor = %actor, cwd = %cwd, "stored cwd gone, using default");
        }
        self.default_cwd.clone()
    }

    async fn run_prompt_turn(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        msg: &InboundMessage,
        prompt: &str,
    ) -> Result<()> {
        let (active, _) = self.state.get_active(&msg.actor);
        let cwd = self.effective_cwd(&msg.actor);
        tracing::info!(
            actor = %msg.actor,
            resume = active.is_some(),
            cwd = %cwd.display(),
            "agent turn started"
        );

        let _typing = TypingGuard::spawn(adapter.clone(), msg.target.clone());

        let outcome = match self.agent.run(prompt, &cwd, active.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(actor = %msg.actor, error = %e, "agent invocation failed");
                return adapter
                    .send_text(&msg.target, &format!("Agent invocation failed: {e}"))
                    .await;
            }
        };

        // Adopt the announced thread even after a failed run; the agent has
        // already written the log and the next turn should resume it.
        if let Some(thread_id) = &outcome.thread_id {
            self.state
                .set_active_session(&msg.actor, thread_id, Some(&cwd.to_string_lossy()))?;
            // Tag the log so the agent's own desktop UI lists this session.
            if !self.sessions.mark_as_desktop_client(thread_id) {
                tracing::debug!(session = %thread_id, "desktop-client tag not applied");
            }
        }

        if outcome.exit_code != 0 {
            tracing::warn!(actor = %msg.actor, exit = outcome.exit_code, "agent run failed");
            let mut text = format!(
                "Agent run failed (exit={}).\n{}",
                outcome.exit_code, outcome.reply
            );
            let stderr = outcome.stderr.trim();
            if !stderr.is_empty() {
                text.push_str("\n\nstderr:\n");
                text.push_str(&tail_chars(stderr, STDERR_TAIL_CHARS));
            }
            return adapter.send_text(&msg.target, &text).await;
        }

        tracing::info!(actor = %msg.actor, chars = outcome.reply.len(), "agent turn finished");
        adapter.send_rich(&msg.target, &outcome.reply).await
    }
}

/// Split `/command arg...` into a lowercase command and its argument string.
/// Accepts `@botname` suffixes on the command as Telegram appends in groups.
fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    let (head, arg) = match rest.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, arg.trim()),
        None => (rest, ""),
    };
    let command = head.split('@').next().unwrap_or(head).to_lowercase();
    if command.is_empty() {
        return None;
    }
    Some((command, arg.to_string()))
}

/// Parse an optional count argument, clamped to `1..=max`.
fn parse_count(arg: &str, default: usize, max: usize) -> usize {
    match arg.trim().parse::<usize>() {
        Ok(n) => n.clamp(1, max),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_args_and_bot_suffix() {
        assert_eq!(
            parse_command("/use 3"),
            Some(("use".to_string(), "3".to_string()))
        );
        assert_eq!(
            parse_command("/sessions@relay_bot 5"),
            Some(("sessions".to_string(), "5".to_string()))
        );
        assert_eq!(
            parse_command("/HELP"),
            Some(("help".to_string(), String::new()))
        );
        assert_eq!(parse_command("plain text"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn counts_clamp_to_range() {
        assert_eq!(parse_count("", 10, 30), 10);
        assert_eq!(parse_count("5", 10, 30), 5);
        assert_eq!(parse_count("0", 10, 30), 1);
        assert_eq!(parse_count("99", 10, 30), 30);
        assert_eq!(parse_count("abc", 10, 30), 10);
    }
}
