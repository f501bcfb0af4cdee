//! In-memory store of completed generations, served by /api/interactions.
//!
//! Interactions are kept in arrival order and are not persisted; the audit
//! log is the only durable trace.

use crate::llm::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One completed generation: the prompt, the reply, and optional context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_prompt: String,
    pub ai_response: String,
    /// Custom system message the client supplied, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_role: Option<String>,
    /// Conversation history the client supplied, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ChatMessage>>,
}

/// Fields of an interaction a client may rewrite.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionUpdate {
    pub user_prompt: Option<String>,
    pub ai_response: Option<String>,
}

/// Ordered in-memory store with uuid ids.
pub struct InteractionStore {
    inner: RwLock<Vec<Interaction>>,
}

impl Default for InteractionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    /// Record a generation; returns the stored interaction with its new id.
    pub async fn add(
        &self,
        user_prompt: impl Into<String>,
        ai_response: impl Into<String>,
        ai_role: Option<String>,
        history: Option<Vec<ChatMessage>>,
    ) -> Interaction {
        let interaction = Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_prompt: user_prompt.into(),
            ai_response: ai_response.into(),
            ai_role,
            history,
        };
        self.inner.write().await.push(interaction.clone());
        interaction
    }

    pub async fn list(&self) -> Vec<Interaction> {
        self.inner.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Interaction> {
        self.inner.read().await.iter().find(|i| i.id == id).cloned()
    }

    /// Apply a partial update; returns the updated interaction, or None when
    /// the id is unknown.
    pub async fn update(&self, id: &str, update: InteractionUpdate) -> Option<Interaction> {
        let mut g = self.inner.write().await;
        let interaction = g.iter_mut().find(|i| i.id == id)?;
        if let Some(prompt) = update.user_prompt {
            interaction.user_prompt = prompt;
        }
        if let Some(response) = update.ai_response {
            interaction.ai_response = response;
        }
        Some(interaction.clone())
    }

    /// Remove by id; returns whether an interaction was removed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut g = self.inner.write().await;
        let before = g.len();
        g.retain(|i| i.id != id);
        g.len() < before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_list_get_roundtrip() {
        let store = InteractionStore::new();
        let added = store.add("what is rust", "a language", None, None).await;
        assert_eq!(store.list().await.len(), 1);
        let got = store.get(&added.id).await.expect("interaction exists");
        assert_eq!(got.user_prompt, "what is rust");
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn update_rewrites_only_provided_fields() {
        let store = InteractionStore::new();
        let added = store.add("prompt", "response", None, None).await;
        let updated = store
            .update(
                &added.id,
                InteractionUpdate {
                    ai_response: Some("better response".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update succeeds");
        assert_eq!(updated.user_prompt, "prompt");
        assert_eq!(updated.ai_response, "better response");
        assert!(store.update("missing", InteractionUpdate::default()).await.is_none());
    }

    #[tokio::test]
    async fn remove_reports_whether_found() {
        let store = InteractionStore::new();
        let added = store.add("p", "r", None, None).await;
        assert!(store.remove(&added.id).await);
        assert!(!store.remove(&added.id).await);
        assert!(store.list().await.is_empty());
    }
}
