pub mod schema;

pub use schema::{CodexConfig, Config, LarkConfig, TelegramConfig};

use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::PathBuf;

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let relay_dir = home.join(".codex-relay");
        let config_path = relay_dir.join("config.toml");

        if !relay_dir.exists() {
            fs::create_dir_all(&relay_dir).context("Failed to create .codex-relay directory")?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config.apply_env_overrides();
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = config_path;
            config.save()?;
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                let telegram = self.telegram.get_or_insert_with(|| TelegramConfig {
                    bot_token: String::new(),
                    allowed_users: Vec::new(),
                });
                telegram.bot_token = token;
            }
        }
        if let Ok(users) = std::env::var("ALLOWED_TELEGRAM_USER_IDS") {
            if let Some(telegram) = self.telegram.as_mut() {
                telegram.allowed_users = split_list(&users);
            }
        }

        let lark_id = std::env::var("FEISHU_APP_ID").ok().filter(|v| !v.is_empty());
        let lark_secret = std::env::var("FEISHU_APP_SECRET")
            .ok()
            .filter(|v| !v.is_empty());
        if lark_id.is_some() || lark_secret.is_some() {
            let lark = self.lark.get_or_insert_with(|| LarkConfig {
                app_id: String::new(),
                app_secret: String::new(),
                verification_token: None,
                port: 9898,
                allowed_users: Vec::new(),
                enable_p2p: false,
                rich_messages: true,
            });
            if let Some(id) = lark_id {
                lark.app_id = id;
            }
            if let Some(secret) = lark_secret {
                lark.app_secret = secret;
            }
        }
        if let Some(lark) = self.lark.as_mut() {
            if let Ok(users) = std::env::var("ALLOWED_FEISHU_OPEN_IDS") {
                lark.allowed_users = split_list(&users);
            }
            if let Ok(val) = std::env::var("FEISHU_ENABLE_P2P") {
                lark.enable_p2p = truthy(&val);
            }
            if let Ok(val) = std::env::var("FEISHU_RICH_MESSAGE") {
                lark.rich_messages = truthy(&val);
            }
        }

        if let Ok(bin) = std::env::var("CODEX_BIN") {
            if !bin.is_empty() {
                self.codex.bin = bin;
            }
        }
        if let Ok(root) = std::env::var("CODEX_SESSION_ROOT") {
            if !root.is_empty() {
                self.session_root = root;
            }
        }
        if let Ok(mode) = std::env::var("CODEX_SANDBOX_MODE") {
            if !mode.is_empty() {
                self.codex.sandbox_mode = mode;
            }
        }
        if let Ok(policy) = std::env::var("CODEX_APPROVAL_POLICY") {
            if !policy.is_empty() {
                self.codex.approval_policy = policy;
            }
        }
        if let Ok(level) = std::env::var("CODEX_DANGEROUS_BYPASS") {
            if let Ok(level) = level.parse::<u8>() {
                self.codex.dangerous_bypass = level.min(2);
            }
        }
        if let Ok(path) = std::env::var("STATE_PATH") {
            if !path.is_empty() {
                self.state_path = path;
            }
        }
        if let Ok(cwd) = std::env::var("DEFAULT_CWD") {
            if !cwd.is_empty() {
                self.default_cwd = Some(cwd);
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!("Failed to create config directory {}", parent_dir.display())
        })?;
        fs::write(&self.config_path, toml_str)
            .with_context(|| format!("Failed to write config to {}", self.config_path.display()))?;
        Ok(())
    }

    /// Session root with `~` expanded.
    pub fn session_root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.session_root).into_owned())
    }

    /// State file path with `~` expanded.
    pub fn state_file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_path).into_owned())
    }

    /// Default working directory with `~` expanded; falls back to the home
    /// directory, then to the process cwd.
    pub fn default_cwd_path(&self) -> PathBuf {
        if let Some(cwd) = &self.default_cwd {
            return PathBuf::from(shellexpand::tilde(cwd).into_owned());
        }
        UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn truthy(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex, MutexGuard};

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().expect("env test lock poisoned")
    }

    const ALL_VARS: &[&str] = &[
        "TELEGRAM_BOT_TOKEN",
        "ALLOWED_TELEGRAM_USER_IDS",
        "FEISHU_APP_ID",
        "FEISHU_APP_SECRET",
        "ALLOWED_FEISHU_OPEN_IDS",
        "FEISHU_ENABLE_P2P",
        "FEISHU_RICH_MESSAGE",
        "CODEX_BIN",
        "CODEX_SESSION_ROOT",
        "CODEX_SANDBOX_MODE",
        "CODEX_APPROVAL_POLICY",
        "CODEX_DANGEROUS_BYPASS",
        "STATE_PATH",
        "DEFAULT_CWD",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.session_root, "~/.codex/sessions");
        assert_eq!(config.codex.bin, "codex");
        assert_eq!(config.codex.sandbox_mode, "danger-full-access");
        assert_eq!(config.codex.approval_policy, "never");
        assert_eq!(config.codex.dangerous_bypass, 0);
        assert!(config.telegram.is_none());
        assert!(config.lark.is_none());
    }

    #[test]
    fn toml_round_trip_preserves_transports() {
        let toml_str = r#"
            session_root = "/var/sessions"

            [telegram]
            bot_token = "123:ABC"
            allowed_users = ["42"]

            [lark]
            app_id = "cli_x"
            app_secret = "s"
            allowed_users = ["*"]
            enable_p2p = true

            [codex]
            bin = "/usr/local/bin/codex"
            dangerous_bypass = 1
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session_root, "/var/sessions");
        assert_eq!(config.telegram.as_ref().unwrap().bot_token, "123:ABC");
        let lark = config.lark.as_ref().unwrap();
        assert!(lark.enable_p2p);
        assert!(lark.rich_messages);
        assert_eq!(lark.port, 9898);
        assert_eq!(config.codex.dangerous_bypass, 1);

        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.telegram.unwrap().allowed_users, vec!["42"]);
    }

    #[test]
    fn env_overrides_create_telegram_section() {
        let _guard = env_guard();
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "999:XYZ");
        std::env::set_var("ALLOWED_TELEGRAM_USER_IDS", "1, 2,3");

        let mut config = Config::default();
        config.apply_env_overrides();
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.bot_token, "999:XYZ");
        assert_eq!(telegram.allowed_users, vec!["1", "2", "3"]);
        clear_env();
    }

    #[test]
    fn env_overrides_codex_settings() {
        let _guard = env_guard();
        clear_env();
        std::env::set_var("CODEX_BIN", "/opt/codex");
        std::env::set_var("CODEX_DANGEROUS_BYPASS", "7");
        std::env::set_var("CODEX_SESSION_ROOT", "/srv/sessions");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.codex.bin, "/opt/codex");
        // Levels above 2 clamp to full bypass.
        assert_eq!(config.codex.dangerous_bypass, 2);
        assert_eq!(config.session_root, "/srv/sessions");
        clear_env();
    }

    #[test]
    fn env_overrides_lark_flags() {
        let _guard = env_guard();
        clear_env();
        std::env::set_var("FEISHU_APP_ID", "cli_env");
        std::env::set_var("FEISHU_APP_SECRET", "sec");
        std::env::set_var("FEISHU_ENABLE_P2P", "true");
        std::env::set_var("FEISHU_RICH_MESSAGE", "0");
        std::env::set_var("ALLOWED_FEISHU_OPEN_IDS", "ou_a,ou_b");

        let mut config = Config::default();
        config.apply_env_overrides();
        let lark = config.lark.unwrap();
        assert_eq!(lark.app_id, "cli_env");
        assert!(lark.enable_p2p);
        assert!(!lark.rich_messages);
        assert_eq!(lark.allowed_users, vec!["ou_a", "ou_b"]);
        clear_env();
    }

    #[test]
    fn tilde_paths_expand() {
        let config = Config::default();
        let root = config.session_root_path();
        assert!(!root.to_string_lossy().contains('~'));
    }
}
