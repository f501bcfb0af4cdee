//! Telegram channel: long-poll getUpdates and sendMessage via Bot API.
//!
//! Forum topics map onto `message_thread_id`; a message without one belongs to
//! the general conversation.

use crate::channels::inbound::InboundMessage;
use crate::channels::platform::{DeliveryError, PlatformChannel};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    #[serde(default)]
    message_thread_id: Option<i64>,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Telegram channel connector: long-polls for updates and delivers replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: String,
    base_url: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, TELEGRAM_API_BASE.to_string())
    }

    /// Custom API base URL (tests or self-hosted Bot API servers).
    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self {
            id: "telegram".to_string(),
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the getUpdates long-poll loop and forward messages to the gateway.
    /// Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), String> {
        let url = format!(
            "{}/bot{}/getUpdates?timeout={}",
            self.base_url, self.token, LONG_POLL_TIMEOUT
        );
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("getUpdates failed: {} {}", status, body));
        }
        let data: GetUpdatesResponse = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err("getUpdates returned ok: false".to_string());
        }
        let next_offset = data
            .result
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1);
        Ok((data.result, next_offset))
    }

    /// Deliver a text message to `(chat_id, topic_id)` via the sendMessage API.
    /// Returns the platform-assigned message id.
    pub async fn send_message(
        &self,
        chat_id: &str,
        topic_id: Option<&str>,
        text: &str,
    ) -> Result<i64, DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(topic) = topic_id {
            // thread ids are numeric on the wire; keep the raw string as a fallback
            body["message_thread_id"] = match topic.parse::<i64>() {
                Ok(n) => serde_json::Value::from(n),
                Err(_) => serde_json::Value::String(topic.to_string()),
            };
        }
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!("{} {}", status, body)));
        }
        let data: SendMessageResponse = res.json().await?;
        match (data.ok, data.result) {
            (true, Some(sent)) => Ok(sent.message_id),
            _ => Err(DeliveryError::Rejected(
                data.description
                    .unwrap_or_else(|| "sendMessage returned ok: false".to_string()),
            )),
        }
    }
}

fn sender_label(from: Option<&TelegramUser>) -> String {
    from.and_then(|u| u.first_name.clone().or_else(|| u.username.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next;
                for u in updates {
                    let Some(ref msg) = u.message else { continue };
                    let Some(ref text) = msg.text else { continue };
                    let inbound = InboundMessage {
                        chat_id: msg.chat.id.to_string(),
                        topic_id: msg.message_thread_id.map(|id| id.to_string()),
                        sender: sender_label(msg.from.as_ref()),
                        text: text.clone(),
                        message_id: msg.message_id,
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl PlatformChannel for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(
        &self,
        chat_id: &str,
        topic_id: Option<&str>,
        text: &str,
    ) -> Result<i64, DeliveryError> {
        TelegramChannel::send_message(self, chat_id, topic_id, text).await
    }
}
