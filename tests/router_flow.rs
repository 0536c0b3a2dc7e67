//! End-to-end router flows over a fake transport and a scripted agent.
//!
//! Exercises the session listing → numeric pick handoff, resume behavior on
//! free text, and the failure paths that must still keep the conversation
//! resumable.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use codex_relay::bridge::{AgentOutcome, AgentRunner};
use codex_relay::channels::traits::{ChannelAdapter, Choice, InboundMessage};
use codex_relay::session::SessionIndex;
use codex_relay::state::StateStore;
use codex_relay::Router;

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingAdapter {
    sent: Mutex<Vec<String>>,
    choices: Mutex<Vec<Vec<Choice>>>,
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, _target: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn send_choices(
        &self,
        target: &str,
        text: &str,
        choices: &[Choice],
    ) -> anyhow::Result<()> {
        self.choices.lock().push(choices.to_vec());
        self.send_text(target, text).await
    }
}

impl RecordingAdapter {
    fn last_sent(&self) -> String {
        self.sent.lock().last().cloned().unwrap_or_default()
    }
}

/// Agent double that returns a canned outcome and records its invocations.
struct ScriptedRunner {
    outcome: AgentOutcome,
    calls: Mutex<Vec<(String, PathBuf, Option<String>)>>,
}

impl ScriptedRunner {
    fn new(outcome: AgentOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn replying(thread_id: &str, reply: &str) -> Self {
        Self::new(AgentOutcome {
            thread_id: Some(thread_id.to_string()),
            reply: reply.to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn run(
        &self,
        prompt: &str,
        cwd: &Path,
        resume_id: Option<&str>,
    ) -> anyhow::Result<AgentOutcome> {
        self.calls.lock().push((
            prompt.to_string(),
            cwd.to_path_buf(),
            resume_id.map(String::from),
        ));
        Ok(self.outcome.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixture
// ─────────────────────────────────────────────────────────────────────────────

struct Fixture {
    _sessions_dir: TempDir,
    _state_dir: TempDir,
    work_dir: TempDir,
    adapter: Arc<RecordingAdapter>,
    runner: Arc<ScriptedRunner>,
    router: Router,
}

fn write_session_log(dir: &Path, name: &str, id: &str, cwd: &str, title: &str) {
    let lines = [
        format!(
            r#"{{"type":"session_meta","payload":{{"id":"{id}","timestamp":"2025-06-01T00:00:00Z","cwd":"{cwd}"}}}}"#
        ),
        format!(r#"{{"type":"event_msg","payload":{{"type":"user_message","message":"{title}"}}}}"#),
        r#"{"type":"event_msg","payload":{"type":"agent_message","message":"done"}}"#.to_string(),
    ];
    fs::write(dir.join(name), lines.join("\n") + "\n").unwrap();
}

fn fixture_with_runner(runner: ScriptedRunner) -> Fixture {
    let sessions_dir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();

    // Three logs with distinct mtimes, oldest first.
    for (name, id, title) in [
        ("a.jsonl", "sess-one", "fix the parser"),
        ("b.jsonl", "sess-two", "write release notes"),
        ("c.jsonl", "sess-three", "refactor config"),
    ] {
        write_session_log(
            sessions_dir.path(),
            name,
            id,
            &work_dir.path().to_string_lossy(),
            title,
        );
        std::thread::sleep(Duration::from_millis(30));
    }

    let adapter = Arc::new(RecordingAdapter::default());
    let runner = Arc::new(runner);
    let router = Router::new(
        SessionIndex::new(sessions_dir.path()),
        StateStore::open(state_dir.path().join("state.json")),
        runner.clone(),
        work_dir.path().to_path_buf(),
    );

    Fixture {
        _sessions_dir: sessions_dir,
        _state_dir: state_dir,
        work_dir,
        adapter,
        runner,
        router,
    }
}

fn fixture() -> Fixture {
    fixture_with_runner(ScriptedRunner::replying("thread-new", "all done"))
}

fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        id: "in-1".into(),
        event_id: None,
        message_id: None,
        actor: "telegram:42".into(),
        target: "chat-1".into(),
        text: text.into(),
        channel: "telegram".into(),
        timestamp: 1_700_000_000,
    }
}

async fn send(fx: &Fixture, text: &str) {
    fx.router
        .handle_message(fx.adapter.clone(), &inbound(text))
        .await
        .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Session listing and numeric pick
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sessions_lists_newest_first_with_choices() {
    let fx = fixture();
    send(&fx, "/sessions 5").await;

    let listing = fx.adapter.last_sent();
    let pos = |needle: &str| listing.find(needle).unwrap();
    assert!(pos("refactor config") < pos("write release notes"));
    assert!(pos("write release notes") < pos("fix the parser"));
    assert!(listing.contains("sess-thr"));

    let choices = fx.adapter.choices.lock();
    assert_eq!(choices.len(), 1);
    assert_eq!(choices[0][0].data, "use:sess-three");
    assert_eq!(choices[0][0].label, "Switch 1");
}

#[tokio::test]
async fn bare_number_after_listing_switches_session() {
    let fx = fixture();
    send(&fx, "/sessions").await;
    send(&fx, "2").await;

    let confirmation = fx.adapter.last_sent();
    assert!(confirmation.contains("Switched to session"));
    assert!(confirmation.contains("write release notes"));
    assert!(confirmation.contains("sess-two"));
    // The pick went to the switch handler, never to the agent.
    assert_eq!(fx.runner.call_count(), 0);

    // Next number is plain text again; the pick window closed.
    send(&fx, "3").await;
    assert_eq!(fx.runner.call_count(), 1);
}

#[tokio::test]
async fn out_of_range_pick_reports_and_stays_pending() {
    let fx = fixture();
    send(&fx, "/sessions").await;
    send(&fx, "9").await;

    assert!(fx.adapter.last_sent().contains("out of range"));
    assert_eq!(fx.runner.call_count(), 0);

    // A valid pick still works afterwards.
    send(&fx, "1").await;
    assert!(fx.adapter.last_sent().contains("sess-three"));
}

#[tokio::test]
async fn non_numeric_text_closes_pick_window_and_goes_to_agent() {
    let fx = fixture();
    send(&fx, "/sessions").await;
    send(&fx, "please fix the tests").await;

    assert_eq!(fx.runner.call_count(), 1);
    let calls = fx.runner.calls.lock();
    assert_eq!(calls[0].0, "please fix the tests");
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt turns and continuity
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn free_text_without_active_session_starts_fresh() {
    let fx = fixture();
    send(&fx, "hello agent").await;

    let calls = fx.runner.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "hello agent");
    assert_eq!(calls[0].1, fx.work_dir.path());
    assert!(calls[0].2.is_none());
    assert_eq!(fx.adapter.last_sent(), "all done");
}

#[tokio::test]
async fn second_turn_resumes_adopted_thread() {
    let fx = fixture();
    send(&fx, "first").await;
    send(&fx, "second").await;

    let calls = fx.runner.calls.lock();
    assert!(calls[0].2.is_none());
    assert_eq!(calls[1].2.as_deref(), Some("thread-new"));
}

#[tokio::test]
async fn use_then_text_resumes_that_session() {
    let fx = fixture();
    send(&fx, "/use sess-one").await;
    assert!(fx.adapter.last_sent().contains("fix the parser"));

    send(&fx, "carry on").await;
    let calls = fx.runner.calls.lock();
    assert_eq!(calls[0].2.as_deref(), Some("sess-one"));
}

#[tokio::test]
async fn failed_run_still_adopts_thread_and_shows_stderr() {
    let fx = fixture_with_runner(ScriptedRunner::new(AgentOutcome {
        thread_id: Some("thread-broken".into()),
        reply: "partial output".into(),
        stderr: "boom: something broke".into(),
        exit_code: 1,
    }));
    send(&fx, "do the thing").await;

    let text = fx.adapter.last_sent();
    assert!(text.contains("exit=1"));
    assert!(text.contains("partial output"));
    assert!(text.contains("boom: something broke"));

    // The failed thread is still the active one for the next turn.
    send(&fx, "try again").await;
    let calls = fx.runner.calls.lock();
    assert_eq!(calls[1].2.as_deref(), Some("thread-broken"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_without_active_session_guides_instead_of_running() {
    let fx = fixture();
    send(&fx, "/history").await;

    assert!(fx.adapter.last_sent().contains("No active session"));
    assert_eq!(fx.runner.call_count(), 0);
}

#[tokio::test]
async fn history_digit_is_a_selector_even_without_a_listing() {
    let fx = fixture();
    send(&fx, "/history 3").await;

    // No listing has been offered, so the index cannot resolve; the digit is
    // never reinterpreted as a line count.
    assert!(fx.adapter.last_sent().contains("out of range"));
    assert_eq!(fx.runner.call_count(), 0);
}

#[tokio::test]
async fn history_digit_indexes_the_last_listing() {
    let fx = fixture();
    send(&fx, "/sessions").await;
    send(&fx, "/history 2").await;

    let text = fx.adapter.last_sent();
    assert!(text.contains("History for write release notes"));
    assert_eq!(fx.runner.call_count(), 0);
}

#[tokio::test]
async fn history_of_named_session_shows_role_labels() {
    let fx = fixture();
    send(&fx, "/history sess-two 5").await;

    let text = fx.adapter.last_sent();
    assert!(text.contains("[user] write release notes"));
    assert!(text.contains("[assistant] done"));
    assert_eq!(fx.runner.call_count(), 0);
}

#[tokio::test]
async fn use_with_unknown_id_reports_not_found() {
    let fx = fixture();
    send(&fx, "/use nope-123").await;
    assert_eq!(fx.adapter.last_sent(), "Session not found: nope-123");
}

#[tokio::test]
async fn new_clears_active_session() {
    let fx = fixture();
    send(&fx, "/use sess-one").await;
    send(&fx, "/new").await;
    assert!(fx.adapter.last_sent().contains("Starting fresh"));

    send(&fx, "clean slate").await;
    let calls = fx.runner.calls.lock();
    assert!(calls[0].2.is_none());
}

#[tokio::test]
async fn new_rejects_missing_directory() {
    let fx = fixture();
    send(&fx, "/new /definitely/not/here").await;
    assert!(fx.adapter.last_sent().contains("Not a directory"));
}

#[tokio::test]
async fn status_reflects_active_session() {
    let fx = fixture();
    send(&fx, "/status").await;
    assert!(fx.adapter.last_sent().contains("No active session"));

    send(&fx, "/use sess-three").await;
    send(&fx, "/status").await;
    let text = fx.adapter.last_sent();
    assert!(text.contains("Active session"));
    assert!(text.contains("sess-three"));
}

#[tokio::test]
async fn unknown_command_suggests_help() {
    let fx = fixture();
    send(&fx, "/frobnicate now").await;
    assert!(fx.adapter.last_sent().contains("Unknown command /frobnicate"));
    assert_eq!(fx.runner.call_count(), 0);
}

#[tokio::test]
async fn ask_routes_slash_text_to_agent() {
    let fx = fixture();
    send(&fx, "/ask /etc/hosts looks wrong").await;

    let calls = fx.runner.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "/etc/hosts looks wrong");
}

#[tokio::test]
async fn empty_ask_shows_usage() {
    let fx = fixture();
    send(&fx, "/ask").await;
    assert!(fx.adapter.last_sent().contains("Usage: /ask"));
    assert_eq!(fx.runner.call_count(), 0);
}
