//! Configuration schema, TOML on disk with environment overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Root of the agent's session log tree.
    #[serde(default = "default_session_root")]
    pub session_root: String,

    /// Location of the bridge's own state document.
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Working directory for fresh sessions when the actor has not picked one.
    #[serde(default)]
    pub default_cwd: Option<String>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub lark: Option<LarkConfig>,

    #[serde(default)]
    pub codex: CodexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Telegram numeric user ids, or "*" for anyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LarkConfig {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default)]
    pub verification_token: Option<String>,
    #[serde(default = "default_lark_port")]
    pub port: u16,
    /// Lark open ids, or "*" for anyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub enable_p2p: bool,
    #[serde(default = "default_true")]
    pub rich_messages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    #[serde(default = "default_codex_bin")]
    pub bin: String,
    #[serde(default = "default_sandbox_mode")]
    pub sandbox_mode: String,
    #[serde(default = "default_approval_policy")]
    pub approval_policy: String,
    /// 0 = agent defaults, 1 = pass sandbox/approval overrides,
    /// 2 = bypass approvals and sandbox entirely.
    #[serde(default)]
    pub dangerous_bypass: u8,
    /// Kill an agent run after this many seconds. Unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            bin: default_codex_bin(),
            sandbox_mode: default_sandbox_mode(),
            approval_policy: default_approval_policy(),
            dangerous_bypass: 0,
            timeout_secs: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            session_root: default_session_root(),
            state_path: default_state_path(),
            default_cwd: None,
            telegram: None,
            lark: None,
            codex: CodexConfig::default(),
        }
    }
}

fn default_session_root() -> String {
    "~/.codex/sessions".to_string()
}

fn default_state_path() -> String {
    "~/.codex-relay/state.json".to_string()
}

fn default_lark_port() -> u16 {
    9898
}

fn default_codex_bin() -> String {
    "codex".to_string()
}

fn default_sandbox_mode() -> String {
    "danger-full-access".to_string()
}

fn default_approval_policy() -> String {
    "never".to_string()
}

fn default_true() -> bool {
    true
}
