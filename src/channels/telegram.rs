//! Telegram transport: long-polling listener plus Bot API sender.

use super::text::chunk_text;
use super::traits::{ChannelAdapter, Choice, InboundMessage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// Telegram caps messages at 4096 chars; stay under it with headroom for
/// the odd entity expansion.
const TELEGRAM_CHUNK_CHARS: usize = 3_800;

pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    fn is_user_allowed(&self, user_id: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == user_id)
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?;
        let value: Value = resp
            .json()
            .await
            .with_context(|| format!("telegram {method} returned non-JSON"))?;
        if value.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(anyhow!("telegram {method} rejected: {description}"));
        }
        Ok(value)
    }

    /// Register the command menu so the surface offers completions.
    pub async fn setup_menu(&self) -> Result<()> {
        let commands = json!([
            {"command": "sessions", "description": "List recent agent sessions"},
            {"command": "use", "description": "Switch to a session by number or id"},
            {"command": "history", "description": "Show recent transcript lines"},
            {"command": "new", "description": "Start a fresh session"},
            {"command": "status", "description": "Show the active session"},
            {"command": "ask", "description": "Send text starting with a slash"},
            {"command": "help", "description": "Show usage"},
        ]);
        self.call("setMyCommands", json!({"commands": commands}))
            .await?;
        self.call("setChatMenuButton", json!({"menu_button": {"type": "commands"}}))
            .await?;
        Ok(())
    }

    /// Long-poll getUpdates forever, pushing normalized messages to `tx`.
    /// Transport errors are logged and retried after a short pause.
    pub async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let mut offset: i64 = 0;
        tracing::info!("telegram listener started");

        loop {
            let resp = self
                .client
                .post(self.api_url("getUpdates"))
                .json(&json!({"timeout": 30, "offset": offset}))
                .timeout(Duration::from_secs(40))
                .send()
                .await;

            let value: Value = match resp {
                Ok(resp) => match resp.json().await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(error = %e, "telegram getUpdates returned non-JSON");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "telegram getUpdates failed");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let Some(updates) = value.get("result").and_then(Value::as_array) else {
                tracing::warn!("telegram getUpdates without result array");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            };

            for update in updates {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(update_id + 1);
                }
                match self.accept_update(update).await {
                    Ok(Some(msg)) => {
                        if tx.send(msg).await.is_err() {
                            tracing::info!("telegram listener stopping, receiver gone");
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "telegram update dropped"),
                }
            }
        }
    }

    /// Handle one update, including the side effects denial replies and
    /// callback acknowledgements need.
    async fn accept_update(&self, update: &Value) -> Result<Option<InboundMessage>> {
        if let Some(callback) = update.get("callback_query") {
            return self.accept_callback(update, callback).await;
        }

        let Some(parsed) = parse_message_update(update) else {
            return Ok(None);
        };
        if !self.is_user_allowed(parsed.user_id()) {
            tracing::warn!(user = %parsed.user_id(), "telegram message from unauthorized user");
            self.call(
                "sendMessage",
                json!({"chat_id": parsed.target, "text": "You are not authorized to use this bot."}),
            )
            .await?;
            return Ok(None);
        }
        Ok(Some(parsed))
    }

    /// An inline-keyboard tap becomes a synthetic `/use <id>` message so the
    /// router never needs to know about keyboards.
    async fn accept_callback(
        &self,
        update: &Value,
        callback: &Value,
    ) -> Result<Option<InboundMessage>> {
        let callback_id = callback.get("id").and_then(Value::as_str).unwrap_or("");
        self.call(
            "answerCallbackQuery",
            json!({"callback_query_id": callback_id, "text": "Switching session…"}),
        )
        .await?;

        let Some(msg) = parse_callback_update(update) else {
            return Ok(None);
        };
        if !self.is_user_allowed(msg.user_id()) {
            tracing::warn!(user = %msg.user_id(), "telegram callback from unauthorized user");
            return Ok(None);
        }
        Ok(Some(msg))
    }
}

trait TelegramActor {
    fn user_id(&self) -> &str;
}

impl TelegramActor for InboundMessage {
    fn user_id(&self) -> &str {
        self.actor.strip_prefix("telegram:").unwrap_or(&self.actor)
    }
}

/// Extract a normalized message from a `message` update, or `None` when the
/// update carries no usable text.
fn parse_message_update(update: &Value) -> Option<InboundMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let chat_id = message.get("chat")?.get("id").and_then(Value::as_i64)?;
    let user_id = message.get("from")?.get("id").and_then(Value::as_i64)?;
    let update_id = update.get("update_id").and_then(Value::as_i64)?;
    let message_id = message.get("message_id").and_then(Value::as_i64);
    let timestamp = message.get("date").and_then(Value::as_u64).unwrap_or(0);

    Some(InboundMessage {
        id: update_id.to_string(),
        event_id: Some(format!("tg-update-{update_id}")),
        message_id: message_id.map(|id| format!("tg-msg-{chat_id}-{id}")),
        actor: format!("telegram:{user_id}"),
        target: chat_id.to_string(),
        text: text.to_string(),
        channel: "telegram".to_string(),
        timestamp,
    })
}

/// Extract a synthetic `/use` message from a `callback_query` update.
fn parse_callback_update(update: &Value) -> Option<InboundMessage> {
    let callback = update.get("callback_query")?;
    let data = callback.get("data").and_then(Value::as_str)?;
    let session_id = data.strip_prefix("use:")?;
    let user_id = callback.get("from")?.get("id").and_then(Value::as_i64)?;
    let chat_id = callback
        .get("message")?
        .get("chat")?
        .get("id")
        .and_then(Value::as_i64)?;
    let update_id = update.get("update_id").and_then(Value::as_i64)?;

    Some(InboundMessage {
        id: update_id.to_string(),
        event_id: Some(format!("tg-update-{update_id}")),
        message_id: None,
        actor: format!("telegram:{user_id}"),
        target: chat_id.to_string(),
        text: format!("/use {session_id}"),
        channel: "telegram".to_string(),
        timestamp: 0,
    })
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        for chunk in chunk_text(text, TELEGRAM_CHUNK_CHARS) {
            self.call("sendMessage", json!({"chat_id": target, "text": chunk}))
                .await?;
        }
        Ok(())
    }

    async fn send_choices(&self, target: &str, text: &str, choices: &[Choice]) -> Result<()> {
        let chunks = chunk_text(text, TELEGRAM_CHUNK_CHARS);
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = json!({"chat_id": target, "text": chunk});
            if i == last && !choices.is_empty() {
                let keyboard: Vec<Value> = choices
                    .iter()
                    .map(|c| json!([{"text": c.label, "callback_data": c.data}]))
                    .collect();
                body["reply_markup"] = json!({"inline_keyboard": keyboard});
            }
            self.call("sendMessage", body).await?;
        }
        Ok(())
    }

    async fn typing(&self, target: &str) -> Result<()> {
        self.call(
            "sendChatAction",
            json!({"chat_id": target, "action": "typing"}),
        )
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.call("getMe", json!({})).await.is_ok()
    }
}
