//! Relay mailbox: in-memory, append-only queue drained whole by client polls.
//!
//! Decouples the asynchronous arrival of platform messages from the web
//! client's pull-based polling. The mailbox is owned by the gateway state and
//! passed by reference to the adapter and handlers; the runtime is
//! multi-threaded, so enqueue/drain are serialized by an explicit lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Sender label for assistant-authored echoes; polling clients display these.
pub const ASSISTANT_SENDER: &str = "assistant";

/// Sender label for echoes of messages a web client sent explicitly. The
/// sending client already rendered the text locally, so pollers skip these.
pub const WEB_CLIENT_SENDER: &str = "web-client";

/// Where a relay message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Received from the platform (a human or bot wrote in the chat).
    Inbound,
    /// A reply the gateway delivered to the platform, echoed here so web
    /// clients polling the conversation can display it.
    OutboundEcho,
}

/// One queued relay message. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub direction: Direction,
    pub chat_id: String,
    /// Forum topic (thread) id; `None` addresses the general conversation
    /// and never matches a concrete topic id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    /// Display name of whoever authored the message.
    pub sender: String,
    pub content: String,
    /// Platform-assigned message id; present once the platform delivered it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl RelayMessage {
    pub fn inbound(
        chat_id: impl Into<String>,
        topic_id: Option<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        message_id: Option<i64>,
    ) -> Self {
        Self {
            direction: Direction::Inbound,
            chat_id: chat_id.into(),
            topic_id,
            sender: sender.into(),
            content: content.into(),
            message_id,
            created_at: Utc::now(),
        }
    }

    pub fn outbound_echo(
        chat_id: impl Into<String>,
        topic_id: Option<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        message_id: Option<i64>,
    ) -> Self {
        Self {
            direction: Direction::OutboundEcho,
            chat_id: chat_id.into(),
            topic_id,
            sender: sender.into(),
            content: content.into(),
            message_id,
            created_at: Utc::now(),
        }
    }
}

/// Unbounded FIFO of relay messages with drain-and-clear reads.
///
/// Every enqueued message is returned by exactly one `drain_all` call: an
/// enqueue concurrent with a drain lands in that batch or the next one,
/// never both. A drain delivered to a client that then drops the response
/// is lost — there is no retry buffer. Two pollers race for the same drain;
/// the loser sees an empty batch (known limitation, kept as-is).
pub struct Mailbox {
    inner: Mutex<Vec<RelayMessage>>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Append a message. Insertion order is preserved; never fails.
    pub async fn enqueue(&self, message: RelayMessage) {
        self.inner.lock().await.push(message);
    }

    /// Return all queued messages in insertion order and clear the queue.
    pub async fn drain_all(&self) -> Vec<RelayMessage> {
        std::mem::take(&mut *self.inner.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
