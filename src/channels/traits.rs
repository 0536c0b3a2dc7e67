//! Common surface every chat transport implements.

use async_trait::async_trait;

/// A message arriving from any chat surface, normalized for the router.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Unique id of this inbound item within its transport.
    pub id: String,
    /// Transport-level delivery id used for duplicate suppression, when the
    /// surface provides one (Telegram update_id, Lark event_id).
    pub event_id: Option<String>,
    /// Message-level id used for duplicate suppression across redeliveries.
    pub message_id: Option<String>,
    /// Stable actor key, e.g. `telegram:123456` or `lark:ou_abc`.
    pub actor: String,
    /// Where replies go (chat id, open id).
    pub target: String,
    pub text: String,
    /// Transport name, e.g. "telegram".
    pub channel: String,
    pub timestamp: u64,
}

/// One tappable option offered alongside a reply.
#[derive(Debug, Clone)]
pub struct Choice {
    pub label: String,
    /// Opaque callback payload handed back when the option is tapped.
    pub data: String,
}

/// Outbound operations a transport offers the router.
///
/// Only `send_text` is mandatory; surfaces without richer rendering fall
/// back to plain text through the default methods.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(&self, target: &str, text: &str) -> anyhow::Result<()>;

    /// Send markdown-formatted content, degrading to plain text by default.
    async fn send_rich(&self, target: &str, text: &str) -> anyhow::Result<()> {
        self.send_text(target, text).await
    }

    /// Send text accompanied by tappable choices. Surfaces without buttons
    /// just send the text; the numbered lines inside it remain selectable
    /// by reply.
    async fn send_choices(&self, target: &str, text: &str, _choices: &[Choice]) -> anyhow::Result<()> {
        self.send_text(target, text).await
    }

    /// Show a short-lived "working on it" indicator. Best effort.
    async fn typing(&self, _target: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
