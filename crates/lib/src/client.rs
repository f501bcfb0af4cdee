//! Relay client: submit messages to the gateway and poll the drain endpoint
//! for platform replies addressed to the held conversation.
//!
//! The drain endpoint hands out the whole mailbox; filtering down to the held
//! `(chat_id, topic_id)` pair happens here. Non-matching messages are
//! discarded, not re-queued — another conversation's poller and this one race
//! for the same drain.

use crate::config::Config;
use crate::mailbox::{Direction, RelayMessage, ASSISTANT_SENDER};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The conversation a client is looking at: chat id plus optional topic id.
/// `topic_id: None` addresses the general conversation and never matches a
/// concrete topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationAddress {
    pub chat_id: String,
    pub topic_id: Option<String>,
}

impl ConversationAddress {
    /// Load the default address from the config record. A missing chat id is
    /// a configuration error; the caller must not start polling.
    pub fn from_config(config: &Config) -> Result<Self> {
        let chat_id = config
            .telegram
            .chat_id
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(chat_id) = chat_id else {
            anyhow::bail!(
                "telegram chat id not configured; set telegram.chatId in the config record"
            );
        };
        Ok(Self {
            chat_id,
            topic_id: config.telegram.topic_id.clone(),
        })
    }

    /// Exact match on the (chat, topic) pair.
    pub fn matches(&self, message: &RelayMessage) -> bool {
        message.chat_id == self.chat_id && message.topic_id == self.topic_id
    }
}

/// True when a drained message should appear in this client's conversation:
/// addressed to the held pair and authored by the assistant on the platform
/// side. Inbound platform traffic and other clients' send echoes are skipped.
pub fn is_displayable(address: &ConversationAddress, message: &RelayMessage) -> bool {
    address.matches(message)
        && message.direction == Direction::OutboundEcho
        && message.sender == ASSISTANT_SENDER
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The gateway could not be reached at all.
    #[error("cannot reach gateway: {0}")]
    Network(#[from] reqwest::Error),
    /// The gateway is up but the messaging feature is not configured.
    #[error("messaging not configured: {0}")]
    Unavailable(String),
    /// The gateway rejected the request or the platform rejected the delivery.
    #[error("{0}")]
    Rejected(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    chat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic_id: Option<&'a str>,
    message: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    sent_message: RelayMessage,
}

#[derive(Deserialize)]
struct DrainResponse {
    messages: Vec<RelayMessage>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

async fn error_detail(res: reqwest::Response) -> String {
    let status = res.status();
    match res.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("http status {}", status),
    }
}

/// HTTP client for the gateway's relay endpoints.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// POST /api/telegram/send. Returns the echoed message on success.
    pub async fn send(
        &self,
        address: &ConversationAddress,
        message: &str,
    ) -> Result<RelayMessage, RelayError> {
        let url = format!("{}/api/telegram/send", self.base_url);
        let body = SendRequest {
            chat_id: &address.chat_id,
            topic_id: address.topic_id.as_deref(),
            message,
        };
        let res = self.http.post(&url).json(&body).send().await?;
        if res.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(RelayError::Unavailable(error_detail(res).await));
        }
        if !res.status().is_success() {
            return Err(RelayError::Rejected(error_detail(res).await));
        }
        let data: SendResponse = res.json().await?;
        Ok(data.sent_message)
    }

    /// GET /api/telegram/messages — drain the mailbox (empties it for all
    /// callers, matching or not).
    pub async fn drain(&self) -> Result<Vec<RelayMessage>, RelayError> {
        let url = format!("{}/api/telegram/messages", self.base_url);
        let res = self.http.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(RelayError::Rejected(error_detail(res).await));
        }
        let data: DrainResponse = res.json().await?;
        Ok(data.messages)
    }
}

/// Handle to a running poller; stopping cancels any in-flight tick.
pub struct RelayPollerHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RelayPollerHandle {
    /// Stop polling. After this returns, no further tick runs and nothing
    /// more is forwarded.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Fixed-interval polling loop over the drain endpoint.
pub struct RelayPoller {
    client: RelayClient,
    address: ConversationAddress,
    interval: Duration,
}

impl RelayPoller {
    pub fn new(client: RelayClient, address: ConversationAddress, interval: Duration) -> Self {
        Self {
            client,
            address,
            interval,
        }
    }

    /// Start polling; matched messages are forwarded to `display_tx`.
    /// The shutdown signal is raced against the polling future, so stop
    /// cancels even a tick that is mid-request.
    pub fn start(self, display_tx: mpsc::Sender<RelayMessage>) -> RelayPollerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        log::info!(
            "relay polling started for chat {} (topic {:?}) every {:?}",
            self.address.chat_id,
            self.address.topic_id,
            self.interval
        );
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = self.run(display_tx) => {}
                _ = wait_for_stop(&mut stop_rx) => {
                    log::info!("relay polling stopped");
                }
            }
        });
        RelayPollerHandle { stop_tx, handle }
    }

    async fn run(self, display_tx: mpsc::Sender<RelayMessage>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.client.drain().await {
                Ok(batch) => {
                    for message in batch {
                        if !is_displayable(&self.address, &message) {
                            continue;
                        }
                        if display_tx.send(message).await.is_err() {
                            log::debug!("relay poller: display channel closed, stopping");
                            return;
                        }
                    }
                }
                Err(RelayError::Network(e)) => {
                    log::warn!("relay poll: gateway unreachable: {}", e);
                }
                Err(e) => {
                    log::warn!("relay poll failed: {}", e);
                }
            }
        }
    }
}

async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    while stop_rx.changed().await.is_ok() {
        if *stop_rx.borrow() {
            return;
        }
    }
    // sender dropped: treat as stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::WEB_CLIENT_SENDER;

    fn held() -> ConversationAddress {
        ConversationAddress {
            chat_id: "A".to_string(),
            topic_id: None,
        }
    }

    fn echo(chat: &str, topic: Option<&str>, sender: &str) -> RelayMessage {
        RelayMessage::outbound_echo(chat, topic.map(String::from), sender, "hi", Some(1))
    }

    #[test]
    fn address_matching_treats_missing_topic_as_distinct() {
        let address = held();
        assert!(address.matches(&echo("A", None, ASSISTANT_SENDER)));
        assert!(!address.matches(&echo("A", Some("t1"), ASSISTANT_SENDER)));
        assert!(!address.matches(&echo("B", None, ASSISTANT_SENDER)));

        let threaded = ConversationAddress {
            chat_id: "A".to_string(),
            topic_id: Some("t1".to_string()),
        };
        assert!(threaded.matches(&echo("A", Some("t1"), ASSISTANT_SENDER)));
        assert!(!threaded.matches(&echo("A", None, ASSISTANT_SENDER)));
    }

    #[test]
    fn only_assistant_echoes_are_displayable() {
        let address = held();
        assert!(is_displayable(&address, &echo("A", None, ASSISTANT_SENDER)));
        assert!(!is_displayable(&address, &echo("A", None, WEB_CLIENT_SENDER)));
        let inbound = RelayMessage::inbound("A", None, "alice", "hello", Some(2));
        assert!(!is_displayable(&address, &inbound));
    }

    #[test]
    fn from_config_requires_a_chat_id() {
        let mut config = Config::default();
        assert!(ConversationAddress::from_config(&config).is_err());
        config.telegram.chat_id = Some("   ".to_string());
        assert!(ConversationAddress::from_config(&config).is_err());
        config.telegram.chat_id = Some("42".to_string());
        config.telegram.topic_id = Some("7".to_string());
        let address = ConversationAddress::from_config(&config).expect("address");
        assert_eq!(address.chat_id, "42");
        assert_eq!(address.topic_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn stop_cancels_polling_promptly() {
        // unroutable gateway; the poller must still stop on request even with
        // a tick in flight
        let poller = RelayPoller::new(
            RelayClient::new("http://127.0.0.1:9"),
            held(),
            Duration::from_secs(600),
        );
        let (display_tx, mut display_rx) = mpsc::channel(8);
        let handle = poller.start(display_tx);
        tokio::task::yield_now().await;
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("stop completes promptly");
        // channel closed without anything forwarded
        assert!(display_rx.recv().await.is_none());
    }
}
