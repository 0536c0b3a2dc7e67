//! Per-actor bridge state, persisted as a single JSON document.

use crate::error::RelayError;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything the bridge remembers about one actor across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorRecord {
    #[serde(default)]
    pub active_session_id: Option<String>,
    #[serde(default)]
    pub active_cwd: Option<String>,
    #[serde(default)]
    pub last_session_ids: Vec<String>,
    #[serde(default)]
    pub pending_session_pick: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDoc {
    #[serde(default)]
    users: HashMap<String, ActorRecord>,
}

/// Store for [`ActorRecord`]s backed by one JSON file.
///
/// Every mutation rewrites the whole document via a temp file and rename, so
/// a crash mid-write leaves the previous state intact. Concurrent mutations
/// for *different* actors are serialized by the internal lock; two racing
/// updates for the *same* actor resolve last-writer-wins, which matches how
/// a chat surface delivers one message per actor at a time.
pub struct StateStore {
    path: PathBuf,
    doc: Mutex<StateDoc>,
}

impl StateStore {
    /// Open the store at `path`, starting empty when the file is missing or
    /// unreadable. A corrupt document is logged and replaced on next write,
    /// never a startup failure.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "state file corrupt, starting fresh");
                    StateDoc::default()
                }
            },
            Err(_) => StateDoc::default(),
        };
        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    pub fn set_active_session(&self, actor: &str, session_id: &str, cwd: Option<&str>) -> Result<()> {
        self.mutate(actor, |record| {
            record.active_session_id = Some(session_id.to_string());
            if let Some(cwd) = cwd {
                record.active_cwd = Some(cwd.to_string());
            }
        })
    }

    /// Forget the active session, optionally moving the actor to a new
    /// working directory for the next fresh run.
    pub fn clear_active_session(&self, actor: &str, cwd: Option<&str>) -> Result<()> {
        self.mutate(actor, |record| {
            record.active_session_id = None;
            if let Some(cwd) = cwd {
                record.active_cwd = Some(cwd.to_string());
            }
            record.pending_session_pick = false;
        })
    }

    /// Remember the ordered session ids last shown to this actor, so a bare
    /// number can select one of them later.
    pub fn set_last_session_ids(&self, actor: &str, ids: Vec<String>) -> Result<()> {
        self.mutate(actor, |record| {
            record.last_session_ids = ids;
            record.pending_session_pick = true;
        })
    }

    pub fn set_pending_pick(&self, actor: &str, pending: bool) -> Result<()> {
        self.mutate(actor, |record| {
            record.pending_session_pick = pending;
        })
    }

    pub fn get_active(&self, actor: &str) -> (Option<String>, Option<String>) {
        let doc = self.doc.lock();
        match doc.users.get(actor) {
            Some(record) => (record.active_session_id.clone(), record.active_cwd.clone()),
            None => (None, None),
        }
    }

    pub fn get_last_session_ids(&self, actor: &str) -> Vec<String> {
        self.doc
            .lock()
            .users
            .get(actor)
            .map(|r| r.last_session_ids.clone())
            .unwrap_or_default()
    }

    pub fn is_pending_pick(&self, actor: &str) -> bool {
        self.doc
            .lock()
            .users
            .get(actor)
            .is_some_and(|r| r.pending_session_pick)
    }

    fn mutate(&self, actor: &str, f: impl FnOnce(&mut ActorRecord)) -> Result<()> {
        let mut doc = self.doc.lock();
        f(doc.users.entry(actor.to_string()).or_default());
        Self::persist(&self.path, &doc)
    }

    fn persist(path: &Path, doc: &StateDoc) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| RelayError::Storage(format!("state serialization failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write state to {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move state into {}", path.display()))?;
        Ok(())
    }
}
