//! Platform channel seam: delivery and lifecycle, behind a trait so the
//! gateway's relay pipeline does not depend on a concrete connector.

use async_trait::async_trait;

/// Outbound delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("platform request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The platform answered but rejected the message; carries its error detail.
    #[error("platform rejected message: {0}")]
    Rejected(String),
}

/// Handle to a running platform channel (stop, send message).
#[async_trait]
pub trait PlatformChannel: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;

    /// Stop the channel connector loop.
    fn stop(&self);

    /// Deliver `text` to `(chat_id, topic_id)`; returns the platform-assigned
    /// message id on success.
    async fn send_message(
        &self,
        chat_id: &str,
        topic_id: Option<&str>,
        text: &str,
    ) -> Result<i64, DeliveryError>;
}
