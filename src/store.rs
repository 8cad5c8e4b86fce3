//! Conversation storage
//!
//! The store holds one [`ConversationState`] per persona plus the id of the
//! currently selected persona. Every setter replaces one field atomically.
//! Persistence across restarts is left to implementations; [`MemoryStore`]
//! keeps everything in process.

use crate::Result;
use crate::types::{ConversationItem, ConversationState, Item};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keyed per-persona conversation storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// State of `persona`, empty if it was never written.
    async fn get_state(&self, persona: &str) -> Result<ConversationState>;

    async fn set_chat_messages(&self, persona: &str, messages: Vec<Item>) -> Result<()>;

    async fn set_conversation_items(
        &self,
        persona: &str,
        items: Vec<ConversationItem>,
    ) -> Result<()>;

    async fn set_last_response_id(&self, persona: &str, id: Option<String>) -> Result<()>;

    async fn set_thread_id(&self, persona: &str, id: Option<String>) -> Result<()>;

    /// Resets one persona to an empty conversation.
    async fn clear_conversation(&self, persona: &str) -> Result<()>;

    /// Resets every persona.
    async fn clear_all(&self) -> Result<()>;

    /// Records the selected persona, returning the previous selection.
    async fn select_persona(&self, persona: &str) -> Result<Option<String>>;

    async fn selected_persona(&self) -> Result<Option<String>>;

    /// Writes the fields a turn mutates.
    async fn save_turn(&self, persona: &str, state: &ConversationState) -> Result<()> {
        self.set_chat_messages(persona, state.chat_messages.clone())
            .await?;
        self.set_conversation_items(persona, state.conversation_items.clone())
            .await?;
        self.set_last_response_id(persona, state.last_response_id.clone())
            .await
    }
}

#[derive(Debug, Default)]
struct Inner {
    personas: HashMap<String, ConversationState>,
    selected: Option<String>,
}

/// In-process [`ConversationStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of personas that have stored state.
    pub async fn personas(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().await.personas.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_state(&self, persona: &str) -> Result<ConversationState> {
        Ok(self
            .inner
            .read()
            .await
            .personas
            .get(persona)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_chat_messages(&self, persona: &str, messages: Vec<Item>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .personas
            .entry(persona.to_string())
            .or_default()
            .chat_messages = messages;
        Ok(())
    }

    async fn set_conversation_items(
        &self,
        persona: &str,
        items: Vec<ConversationItem>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .personas
            .entry(persona.to_string())
            .or_default()
            .conversation_items = items;
        Ok(())
    }

    async fn set_last_response_id(&self, persona: &str, id: Option<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .personas
            .entry(persona.to_string())
            .or_default()
            .last_response_id = id;
        Ok(())
    }

    async fn set_thread_id(&self, persona: &str, id: Option<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.personas.entry(persona.to_string()).or_default().thread_id = id;
        Ok(())
    }

    async fn clear_conversation(&self, persona: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .personas
            .insert(persona.to_string(), ConversationState::new());
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        for state in inner.personas.values_mut() {
            *state = ConversationState::new();
        }
        Ok(())
    }

    async fn select_persona(&self, persona: &str) -> Result<Option<String>> {
        let mut inner = self.inner.write().await;
        inner.personas.entry(persona.to_string()).or_default();
        Ok(inner.selected.replace(persona.to_string()))
    }

    async fn selected_persona(&self) -> Result<Option<String>> {
        Ok(self.inner.read().await.selected.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageItem, Role};

    #[tokio::test]
    async fn test_unknown_persona_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.get_state("nobody").await.unwrap(), ConversationState::new());
    }

    #[tokio::test]
    async fn test_setters_replace_one_field() {
        let store = MemoryStore::new();
        store
            .set_chat_messages("a", vec![Item::Message(MessageItem::user("hi"))])
            .await
            .unwrap();
        store
            .set_last_response_id("a", Some("resp_1".into()))
            .await
            .unwrap();
        store.set_thread_id("a", Some("t1".into())).await.unwrap();

        let state = store.get_state("a").await.unwrap();
        assert_eq!(state.chat_messages.len(), 1);
        assert!(state.conversation_items.is_empty());
        assert_eq!(state.last_response_id.as_deref(), Some("resp_1"));
        assert_eq!(state.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_personas_are_isolated_and_clearable() {
        let store = MemoryStore::new();
        store
            .set_conversation_items("a", vec![ConversationItem::message(Role::User, "x")])
            .await
            .unwrap();
        store
            .set_conversation_items("b", vec![ConversationItem::message(Role::User, "y")])
            .await
            .unwrap();

        store.clear_conversation("a").await.unwrap();
        assert!(store.get_state("a").await.unwrap().conversation_items.is_empty());
        assert_eq!(store.get_state("b").await.unwrap().conversation_items.len(), 1);

        store.clear_all().await.unwrap();
        assert!(store.get_state("b").await.unwrap().conversation_items.is_empty());
        assert_eq!(store.personas().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_select_persona_returns_previous() {
        let store = MemoryStore::new();
        assert_eq!(store.select_persona("a").await.unwrap(), None);
        assert_eq!(store.select_persona("b").await.unwrap(), Some("a".into()));
        assert_eq!(store.selected_persona().await.unwrap(), Some("b".into()));
    }
}
