//! Groq chat-completion client (OpenAI-compatible API).

use crate::config::GroqConfig;
use crate::llm::{LlmBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// One chat message (role is "system", "user" or "assistant").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for the Groq chat-completions HTTP API.
#[derive(Clone)]
pub struct GroqClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl GroqClient {
    /// Build from the config section and a resolved API key.
    pub fn new(api_key: String, groq: &GroqConfig) -> Self {
        Self::with_base_url(api_key, groq, DEFAULT_BASE_URL.to_string())
    }

    /// Custom API base URL (tests or proxies).
    pub fn with_base_url(api_key: String, groq: &GroqConfig, base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: groq.model.clone(),
            temperature: groq.temperature,
            max_tokens: groq.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    /// POST /chat/completions — non-streaming. Returns the first choice's
    /// content; an empty or missing content is `LlmError::NoContent`.
    pub async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: ChatCompletionResponse = res.json().await?;
        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or(LlmError::NoContent)
    }
}

#[async_trait]
impl LlmBackend for GroqClient {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        self.chat_completion(messages).await
    }
}
