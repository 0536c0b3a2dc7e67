//! Conversation log discovery and indexing.
//!
//! The external agent appends one JSONL file per conversation under its
//! session root. The first line is a `session_meta` record; later `event_msg`
//! lines carry the transcript. Nothing here is cached: metadata is recomputed
//! from the files on every lookup.

pub mod index;
pub mod types;

pub use index::SessionIndex;
pub use types::{ConversationMeta, Role, TranscriptEntry};
