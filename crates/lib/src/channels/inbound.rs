//! Inbound message from the platform: delivered to the gateway for mailbox
//! capture and auto-reply handling.

/// A message captured from the platform, addressed by chat and optional topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: String,
    /// Forum topic (thread) id; absent for non-threaded chats.
    pub topic_id: Option<String>,
    /// Sender display name (first name, else username).
    pub sender: String,
    pub text: String,
    /// Platform-assigned id of the received message.
    pub message_id: i64,
}
