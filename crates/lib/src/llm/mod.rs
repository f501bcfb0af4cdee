//! LLM abstraction and Groq client.
//!
//! The gateway's completion endpoint and the platform auto-reply path are
//! generic over `LlmBackend` so tests can substitute a canned backend.

mod groq;

pub use groq::{ChatMessage, GroqClient};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion api error: {0}")]
    Api(String),
    #[error("the model did not generate a response")]
    NoContent,
}

/// Chat completion backend: messages in, reply text out.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError>;
}
