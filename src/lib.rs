#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::items_after_statements,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

//! Bridge between chat surfaces and a local CLI coding agent.
//!
//! Inbound messages from Telegram or Lark are normalized, deduplicated, and
//! routed either to slash-command handlers or to a `codex exec` subprocess
//! whose session the bridge resumes across turns.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod dedup;
pub mod error;
pub mod router;
pub mod session;
pub mod state;
pub mod util;

pub use config::Config;
pub use router::Router;
