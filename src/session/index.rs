//! Lookup operations over the agent's on-disk session logs.

use super::types::{ConversationMeta, LogRecord, TranscriptEntry};
use crate::util::compact_one_line;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Lines scanned when deriving a title from the first user message.
const TITLE_SCAN_LINES: usize = 240;
/// Titles are compacted to one line of at most this many characters.
const TITLE_MAX_CHARS: usize = 46;

/// Read-only view over the session log directory tree.
///
/// Every operation re-reads the files it needs; there is no cache to
/// invalidate when the external agent appends to a log between calls.
pub struct SessionIndex {
    root: PathBuf,
}

impl SessionIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// List up to `limit` sessions, most recently *modified* first.
    ///
    /// Ordering is by file mtime, not the log-internal timestamp: a session
    /// resumed from any client bubbles back to the top of the list.
    pub fn list_recent(&self, limit: usize) -> Vec<ConversationMeta> {
        let mut files: Vec<(SystemTime, PathBuf)> = self
            .log_files()
            .into_iter()
            .filter_map(|path| {
                let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((mtime, path))
            })
            .collect();
        files.sort_by(|a, b| b.0.cmp(&a.0));

        let mut sessions = Vec::new();
        for (_, path) in files {
            let Some(meta) = self.parse_meta(&path) else {
                continue;
            };
            sessions.push(meta);
            if sessions.len() >= limit {
                break;
            }
        }
        sessions
    }

    /// Find a session by its exact id, scanning the whole tree.
    ///
    /// When the same id appears in more than one file, whichever file the
    /// walk enumerates first wins; enumeration order is filesystem-dependent
    /// and deliberately unspecified.
    pub fn find_by_id(&self, session_id: &str) -> Option<ConversationMeta> {
        self.log_files()
            .into_iter()
            .filter_map(|path| self.parse_meta(&path))
            .find(|meta| meta.session_id == session_id)
    }

    /// Return the session metadata together with the last `limit` transcript
    /// entries, oldest first.
    ///
    /// Fails softly: an unreadable log yields the metadata with an empty
    /// transcript, and individual malformed lines are skipped.
    pub fn get_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Option<(ConversationMeta, Vec<TranscriptEntry>)> {
        let meta = self.find_by_id(session_id)?;

        let file = match File::open(&meta.log_path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %meta.log_path.display(), error = %e, "session log unreadable");
                return Some((meta, Vec::new()));
            }
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else {
                // Torn read mid-file: keep what we have.
                break;
            };
            let Ok(LogRecord::EventMsg { payload: Some(payload) }) =
                serde_json::from_str::<LogRecord>(&line)
            else {
                continue;
            };
            let Some(role) = payload.role() else {
                continue;
            };
            let text = payload.message.unwrap_or_default().trim().to_string();
            if text.is_empty() {
                continue;
            }
            entries.push(TranscriptEntry { role, text });
        }

        if limit > 0 && entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Some((meta, entries))
    }

    /// Mark a session log as belonging to the desktop client so the agent's
    /// own UI lists it.
    ///
    /// Patches only the first record (which must be `session_meta`), setting
    /// `payload.source = "vscode"` and `payload.originator = "Codex Desktop"`.
    /// Idempotent: returns `true` without rewriting when both fields already
    /// match. Returns `false` on any structural mismatch or I/O failure.
    pub fn mark_as_desktop_client(&self, session_id: &str) -> bool {
        let Some(meta) = self.find_by_id(session_id) else {
            return false;
        };
        match Self::patch_first_record(&meta.log_path) {
            Ok(patched) => patched,
            Err(e) => {
                tracing::warn!(path = %meta.log_path.display(), error = %e, "desktop-client patch failed");
                false
            }
        }
    }

    fn patch_first_record(path: &Path) -> anyhow::Result<bool> {
        let contents = fs::read_to_string(path)?;
        let mut lines: Vec<&str> = contents.lines().collect();
        let Some(first) = lines.first() else {
            return Ok(false);
        };

        // Patch on the raw JSON value so unknown fields survive the rewrite.
        let mut record: serde_json::Value = serde_json::from_str(first)?;
        if record.get("type").and_then(|t| t.as_str()) != Some("session_meta") {
            return Ok(false);
        }
        let payload = record
            .as_object_mut()
            .map(|obj| {
                obj.entry("payload")
                    .or_insert_with(|| serde_json::json!({}))
            })
            .and_then(|p| p.as_object_mut());
        let Some(payload) = payload else {
            return Ok(false);
        };

        let mut changed = false;
        if payload.get("source").and_then(|v| v.as_str()) != Some("vscode") {
            payload.insert("source".into(), serde_json::json!("vscode"));
            changed = true;
        }
        if payload.get("originator").and_then(|v| v.as_str()) != Some("Codex Desktop") {
            payload.insert("originator".into(), serde_json::json!("Codex Desktop"));
            changed = true;
        }
        if !changed {
            return Ok(true);
        }

        let patched = serde_json::to_string(&record)?;
        lines[0] = &patched;
        fs::write(path, lines.join("\n") + "\n")?;
        Ok(true)
    }

    /// Enumerate `*.jsonl` files under the root, recursively.
    fn log_files(&self) -> Vec<PathBuf> {
        if !self.root.exists() {
            return Vec::new();
        }
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "jsonl")
            })
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    /// Materialize metadata from one log file, or `None` when the file's
    /// first line is not a usable `session_meta` record.
    fn parse_meta(&self, path: &Path) -> Option<ConversationMeta> {
        let file = File::open(path).ok()?;
        let first_line = BufReader::new(file).lines().next()?.ok()?;
        let LogRecord::SessionMeta { payload: Some(payload) } =
            serde_json::from_str::<LogRecord>(&first_line).ok()?
        else {
            return None;
        };
        let session_id = payload.id.filter(|id| !id.is_empty())?;

        let title = Self::extract_title(path).unwrap_or_else(|| {
            let short: String = session_id.chars().take(8).collect();
            format!("session {short}")
        });

        Some(ConversationMeta {
            session_id,
            timestamp: payload.timestamp.unwrap_or_else(|| "unknown".into()),
            cwd: payload.cwd.unwrap_or_else(|| "unknown".into()),
            log_path: path.to_path_buf(),
            title,
        })
    }

    /// First non-empty user message within the head of the log, compacted to
    /// a one-line title.
    fn extract_title(path: &Path) -> Option<String> {
        let file = File::open(path).ok()?;
        for line in BufReader::new(file).lines().take(TITLE_SCAN_LINES) {
            let line = line.ok()?;
            let Ok(LogRecord::EventMsg { payload: Some(payload) }) =
                serde_json::from_str::<LogRecord>(&line)
            else {
                continue;
            };
            if payload.kind.as_deref() != Some("user_message") {
                continue;
            }
            let message = payload.message.unwrap_or_default();
            let message = message.trim();
            if message.is_empty() {
                continue;
            }
            return Some(compact_one_line(message, TITLE_MAX_CHARS));
        }
        None
    }
}
