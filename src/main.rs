#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use codex_relay::bridge::{AgentRunner, BypassLevel, CodexCli};
use codex_relay::channels::{ChannelAdapter, InboundMessage, LarkChannel, TelegramChannel};
use codex_relay::dedup::DedupGates;
use codex_relay::session::SessionIndex;
use codex_relay::state::StateStore;
use codex_relay::{Config, Router};

/// codex-relay - chat front end for a local coding agent
#[derive(Parser, Debug)]
#[command(name = "codex-relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge (default)
    Start,
    /// List recent agent sessions on this machine
    Sessions {
        /// How many sessions to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Check transport credentials and the agent binary
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let config = Config::load_or_init()?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => start(config).await,
        Commands::Sessions { limit } => list_sessions(&config, limit),
        Commands::Doctor => doctor(config).await,
    }
}

async fn start(config: Config) -> Result<()> {
    let sessions = SessionIndex::new(config.session_root_path());
    let state = StateStore::open(config.state_file_path());
    let agent: Arc<dyn AgentRunner> = Arc::new(CodexCli::new(
        shellexpand::tilde(&config.codex.bin).into_owned(),
        &config.codex.sandbox_mode,
        &config.codex.approval_policy,
        BypassLevel::from_level(config.codex.dangerous_bypass),
        config.codex.timeout_secs.map(Duration::from_secs),
    ));
    let router = Arc::new(Router::new(
        sessions,
        state,
        agent,
        config.default_cwd_path(),
    ));

    let mut transports = 0;

    if let Some(tg) = &config.telegram {
        if tg.bot_token.is_empty() {
            warn!("telegram configured without a bot token, skipping");
        } else {
            let adapter = Arc::new(TelegramChannel::new(
                tg.bot_token.clone(),
                tg.allowed_users.clone(),
            ));
            if let Err(e) = adapter.setup_menu().await {
                warn!(error = %e, "telegram command menu setup failed");
            }

            let (tx, rx) = mpsc::channel::<InboundMessage>(64);
            let listener = adapter.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.listen(tx).await {
                    warn!(error = %e, "telegram listener exited");
                }
            });
            spawn_pump(adapter, rx, router.clone());
            transports += 1;
        }
    }

    if let Some(lark) = &config.lark {
        if lark.app_id.is_empty() || lark.app_secret.is_empty() {
            warn!("lark configured without app credentials, skipping");
        } else {
            let adapter = Arc::new(LarkChannel::new(
                lark.app_id.clone(),
                lark.app_secret.clone(),
                lark.verification_token.clone().unwrap_or_default(),
                lark.port,
                lark.allowed_users.clone(),
                lark.enable_p2p,
                lark.rich_messages,
            ));

            let (tx, rx) = mpsc::channel::<InboundMessage>(64);
            let listener = adapter.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.listen(tx).await {
                    warn!(error = %e, "lark listener exited");
                }
            });
            spawn_pump(adapter, rx, router.clone());
            transports += 1;
        }
    }

    if transports == 0 {
        bail!("no transport configured; set [telegram] or [lark] in the config file");
    }

    info!(transports, "codex-relay running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

/// Drain one transport's inbound queue through the duplicate gates into the
/// router. Each transport gets its own gates; ids are not comparable across
/// surfaces.
fn spawn_pump(
    adapter: Arc<dyn ChannelAdapter>,
    mut rx: mpsc::Receiver<InboundMessage>,
    router: Arc<Router>,
) {
    tokio::spawn(async move {
        let gates = DedupGates::default();
        while let Some(msg) = rx.recv().await {
            if let Some(event_id) = &msg.event_id {
                if gates.events.seen(event_id) {
                    tracing::debug!(event_id = %event_id, "duplicate event skipped");
                    continue;
                }
            }
            if let Some(message_id) = &msg.message_id {
                if gates.messages.seen(message_id) {
                    tracing::debug!(message_id = %message_id, "duplicate message skipped");
                    continue;
                }
            }
            if let Err(e) = router.handle_message(adapter.clone(), &msg).await {
                warn!(channel = %msg.channel, actor = %msg.actor, error = %e, "message handling failed");
            }
        }
    });
}

fn list_sessions(config: &Config, limit: usize) -> Result<()> {
    let sessions = SessionIndex::new(config.session_root_path());
    let list = sessions.list_recent(limit.clamp(1, 100));
    if list.is_empty() {
        println!("No sessions under {}", config.session_root_path().display());
        return Ok(());
    }
    for (i, meta) in list.iter().enumerate() {
        println!(
            "{}. {} | {} | {}",
            i + 1,
            meta.title,
            meta.short_id(),
            meta.cwd
        );
    }
    Ok(())
}

async fn doctor(config: Config) -> Result<()> {
    let agent_path = shellexpand::tilde(&config.codex.bin).into_owned();
    let found = which_binary(&agent_path);
    println!(
        "agent binary {}: {}",
        agent_path,
        if found { "ok" } else { "NOT FOUND" }
    );

    let root = config.session_root_path();
    println!(
        "session root {}: {}",
        root.display(),
        if root.is_dir() { "ok" } else { "missing" }
    );

    if let Some(tg) = &config.telegram {
        let adapter = TelegramChannel::new(tg.bot_token.clone(), tg.allowed_users.clone());
        let ok = adapter.health_check().await;
        println!("telegram: {}", if ok { "ok" } else { "FAILED" });
    }
    if let Some(lark) = &config.lark {
        let adapter = LarkChannel::new(
            lark.app_id.clone(),
            lark.app_secret.clone(),
            lark.verification_token.clone().unwrap_or_default(),
            lark.port,
            lark.allowed_users.clone(),
            lark.enable_p2p,
            lark.rich_messages,
        );
        let ok = adapter.health_check().await;
        println!("lark: {}", if ok { "ok" } else { "FAILED" });
    }
    Ok(())
}

/// Resolve a binary either as an absolute/relative path or on PATH.
fn which_binary(bin: &str) -> bool {
    let path = std::path::Path::new(bin);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file()))
        .unwrap_or(false)
}
