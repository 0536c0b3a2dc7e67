//! Lark/Feishu transport: HTTP event-callback listener plus Open API sender.

use super::text::{adapt_markdown, chunk_text};
use super::traits::{ChannelAdapter, InboundMessage};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

const FEISHU_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Plain text messages are chunked smaller than cards; the text surface
/// wraps long lines poorly.
const LARK_TEXT_CHUNK_CHARS: usize = 1_800;
const LARK_CARD_CHUNK_CHARS: usize = 3_200;

static AT_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<at[^>]*>.*?</at>").unwrap());

pub struct LarkChannel {
    app_id: String,
    app_secret: String,
    verification_token: String,
    port: u16,
    allowed_users: Vec<String>,
    /// Accept direct (p2p) chats, not just group mentions.
    enable_p2p: bool,
    /// Render agent replies as interactive cards instead of plain text.
    rich_messages: bool,
    client: reqwest::Client,
    /// Cached tenant access token, refreshed on 401.
    tenant_token: Arc<RwLock<Option<String>>>,
}

impl LarkChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_id: String,
        app_secret: String,
        verification_token: String,
        port: u16,
        allowed_users: Vec<String>,
        enable_p2p: bool,
        rich_messages: bool,
    ) -> Self {
        Self {
            app_id,
            app_secret,
            verification_token,
            port,
            allowed_users,
            enable_p2p,
            rich_messages,
            client: reqwest::Client::new(),
            tenant_token: Arc::new(RwLock::new(None)),
        }
    }

    fn is_user_allowed(&self, open_id: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == open_id)
    }

    async fn get_tenant_access_token(&self) -> Result<String> {
        {
            let cached = self.tenant_token.read().await;
            if let Some(ref token) = *cached {
                return Ok(token.clone());
            }
        }

        let url = format!("{FEISHU_BASE_URL}/auth/v3/tenant_access_token/internal");
        let body = json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let data: Value = resp.json().await?;

        let code = data.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let msg = data
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            anyhow::bail!("lark tenant_access_token failed: {msg}");
        }

        let token = data
            .get("tenant_access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing tenant_access_token in response"))?
            .to_string();

        {
            let mut cached = self.tenant_token.write().await;
            *cached = Some(token.clone());
        }
        Ok(token)
    }

    async fn invalidate_token(&self) {
        let mut cached = self.tenant_token.write().await;
        *cached = None;
    }

    /// POST a message body, retrying once with a fresh token on 401.
    async fn post_message(&self, body: &Value) -> Result<()> {
        let url = format!("{FEISHU_BASE_URL}/im/v1/messages?receive_id_type=chat_id");
        let token = self.get_tenant_access_token().await?;

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json; charset=utf-8")
            .json(body)
            .send()
            .await?;

        if resp.status().as_u16() == 401 {
            self.invalidate_token().await;
            let new_token = self.get_tenant_access_token().await?;
            let retry = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {new_token}"))
                .header("Content-Type", "application/json; charset=utf-8")
                .json(body)
                .send()
                .await?;
            if !retry.status().is_success() {
                let err = retry.text().await.unwrap_or_default();
                anyhow::bail!("lark send failed after token refresh: {err}");
            }
            return Ok(());
        }

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("lark send failed: {err}");
        }
        Ok(())
    }

    async fn send_card(&self, target: &str, title: &str, body_md: &str) -> Result<()> {
        let card = json!({
            "config": {"wide_screen_mode": true},
            "header": {
                "template": "blue",
                "title": {"tag": "plain_text", "content": title},
            },
            "elements": [
                {"tag": "markdown", "content": body_md},
            ],
        });
        let body = json!({
            "receive_id": target,
            "msg_type": "interactive",
            "content": card.to_string(),
        });
        self.post_message(&body).await
    }

    /// Parse one event callback into a normalized message.
    ///
    /// Filters out non-message events, messages from other apps, non-text
    /// content, unauthorized senders, and direct chats when p2p is off.
    /// At-mention markup is stripped so group mentions read as plain text.
    pub fn parse_event_payload(&self, payload: &Value) -> Option<InboundMessage> {
        let event_type = payload
            .pointer("/header/event_type")
            .and_then(Value::as_str)
            .unwrap_or("");
        if event_type != "im.message.receive_v1" {
            return None;
        }

        let event = payload.get("event")?;

        // Echoes of our own (or any app's) messages come back as events.
        if event
            .pointer("/sender/sender_type")
            .and_then(Value::as_str)
            == Some("app")
        {
            return None;
        }

        let open_id = event
            .pointer("/sender/sender_id/open_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        if open_id.is_empty() {
            return None;
        }
        if !self.is_user_allowed(open_id) {
            tracing::warn!(open_id = %open_id, "lark message from unauthorized user");
            return None;
        }

        let chat_type = event
            .pointer("/message/chat_type")
            .and_then(Value::as_str)
            .unwrap_or("");
        if chat_type == "p2p" && !self.enable_p2p {
            tracing::debug!("lark p2p chat ignored, enable_p2p is off");
            return None;
        }

        let msg_type = event
            .pointer("/message/message_type")
            .and_then(Value::as_str)
            .unwrap_or("");
        if msg_type != "text" {
            tracing::debug!(msg_type = %msg_type, "lark non-text message skipped");
            return None;
        }

        // content is a JSON string like "{\"text\":\"hello\"}"
        let content_str = event
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or("");
        let raw_text = serde_json::from_str::<Value>(content_str)
            .ok()
            .and_then(|v| v.get("text").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let text = AT_MENTION.replace_all(&raw_text, "").trim().to_string();
        if text.is_empty() {
            return None;
        }

        let timestamp = event
            .pointer("/message/create_time")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<u64>().ok())
            // Lark timestamps are in milliseconds
            .map(|ms| ms / 1000)
            .unwrap_or_else(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            });

        let chat_id = event
            .pointer("/message/chat_id")
            .and_then(Value::as_str)
            .unwrap_or(open_id);
        let event_id = payload
            .pointer("/header/event_id")
            .and_then(Value::as_str)
            .map(String::from);
        let message_id = event
            .pointer("/message/message_id")
            .and_then(Value::as_str)
            .map(String::from);

        Some(InboundMessage {
            id: Uuid::new_v4().to_string(),
            event_id,
            message_id,
            actor: format!("lark:{open_id}"),
            target: chat_id.to_string(),
            text,
            channel: "lark".to_string(),
            timestamp,
        })
    }

    /// Run the event callback server until the receiver side goes away.
    pub async fn listen(self: Arc<Self>, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        use axum::{extract::State, routing::post, Json, Router};

        #[derive(Clone)]
        struct AppState {
            verification_token: String,
            channel: Arc<LarkChannel>,
            tx: mpsc::Sender<InboundMessage>,
        }

        async fn handle_event(
            State(state): State<AppState>,
            Json(payload): Json<Value>,
        ) -> axum::response::Response {
            use axum::http::StatusCode;
            use axum::response::IntoResponse;

            // URL verification challenge
            if let Some(challenge) = payload.get("challenge").and_then(Value::as_str) {
                let token_ok = payload
                    .get("token")
                    .and_then(Value::as_str)
                    .is_none_or(|t| t == state.verification_token);
                if !token_ok {
                    return (StatusCode::FORBIDDEN, "invalid token").into_response();
                }
                let resp = json!({ "challenge": challenge });
                return (StatusCode::OK, Json(resp)).into_response();
            }

            if let Some(msg) = state.channel.parse_event_payload(&payload) {
                if state.tx.send(msg).await.is_err() {
                    tracing::warn!("lark event receiver gone");
                }
            }
            (StatusCode::OK, "ok").into_response()
        }

        let state = AppState {
            verification_token: self.verification_token.clone(),
            channel: self.clone(),
            tx,
        };
        let app = Router::new()
            .route("/lark", post(handle_event))
            .with_state(state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!(%addr, "lark event callback server listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for LarkChannel {
    fn name(&self) -> &str {
        "lark"
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        for chunk in chunk_text(text, LARK_TEXT_CHUNK_CHARS) {
            let body = json!({
                "receive_id": target,
                "msg_type": "text",
                "content": json!({"text": chunk}).to_string(),
            });
            self.post_message(&body).await?;
        }
        Ok(())
    }

    async fn send_rich(&self, target: &str, text: &str) -> Result<()> {
        if !self.rich_messages {
            return self.send_text(target, text).await;
        }

        let adapted = adapt_markdown(text);
        let title = adapted.title.unwrap_or_else(|| "Agent reply".to_string());
        let chunks = chunk_text(&adapted.body, LARK_CARD_CHUNK_CHARS);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            let numbered = if total > 1 {
                format!("{} ({}/{})", title, i + 1, total)
            } else {
                title.clone()
            };
            self.send_card(target, &numbered, chunk).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.get_tenant_access_token().await.is_ok()
    }
}
