use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use crate::history::{ sort_and_truncate, ConversationStore, StoreError };
use crate::models::chat::{
    Conversation,
    ConversationContext,
    ConversationSummary,
    Message,
    SessionContext,
};

#[derive(Default)]
struct Tables {
    messages: HashMap<String, Vec<Message>>,
    contexts: HashMap<String, ConversationContext>,
    conversations: HashMap<String, Conversation>,
}

/// In-process store; the local backend and the fallback target.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save_messages(
        &self,
        session: &SessionContext,
        messages: &[Message]
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.messages.insert(session.session_id.clone(), messages.to_vec());
        Ok(())
    }

    async fn load_messages(&self, session: &SessionContext) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.messages.get(&session.session_id).cloned().unwrap_or_default())
    }

    async fn clear_messages(&self, session: &SessionContext) -> Result<(), StoreError> {
        self.tables.write().await.messages.remove(&session.session_id);
        Ok(())
    }

    async fn save_context(
        &self,
        session: &SessionContext,
        context: &ConversationContext
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.contexts.insert(session.session_id.clone(), context.clone());
        Ok(())
    }

    async fn load_context(
        &self,
        session: &SessionContext
    ) -> Result<Option<ConversationContext>, StoreError> {
        Ok(self.tables.read().await.contexts.get(&session.session_id).cloned())
    }

    async fn clear_context(&self, session: &SessionContext) -> Result<(), StoreError> {
        self.tables.write().await.contexts.remove(&session.session_id);
        Ok(())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let mut record = conversation.clone();
        if let Some(existing) = tables.conversations.get(&record.id) {
            record.created_at = existing.created_at;
        }
        record.normalize_timestamps();
        tables.conversations.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let tables = self.tables.read().await;
        let summaries = tables.conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .map(Conversation::summary)
            .collect();
        Ok(sort_and_truncate(summaries))
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.tables.read().await.conversations.get(id).cloned())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.conversations.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{ Duration, Utc };

    fn conversation(id: &str, user: &str, age_minutes: i64) -> Conversation {
        let at = Utc::now() - Duration::minutes(age_minutes);
        Conversation {
            id: id.to_string(),
            user_id: user.to_string(),
            title: format!("Conversation {}", id),
            messages: vec![Message::user("hello")],
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn messages_are_scoped_per_session() {
        let store = MemoryStore::new();
        let a = SessionContext::anonymous();
        let b = SessionContext::anonymous();

        store.save_messages(&a, &[Message::user("one"), Message::assistant("two")]).await.unwrap();
        assert_eq!(store.load_messages(&a).await.unwrap().len(), 2);
        assert!(store.load_messages(&b).await.unwrap().is_empty());

        store.clear_messages(&a).await.unwrap();
        assert!(store.load_messages(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_round_trips_and_clears() {
        let store = MemoryStore::new();
        let session = SessionContext::anonymous();
        assert!(store.load_context(&session).await.unwrap().is_none());

        let mut context = ConversationContext::new();
        context.message_count = 3;
        store.save_context(&session, &context).await.unwrap();
        assert_eq!(store.load_context(&session).await.unwrap(), Some(context));

        store.clear_context(&session).await.unwrap();
        assert!(store.load_context(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_original_creation_time() {
        let store = MemoryStore::new();
        let original = conversation("c1", "u1", 60);
        store.save_conversation(&original).await.unwrap();

        let mut updated = conversation("c1", "u1", 0);
        updated.title = "Renamed".into();
        store.save_conversation(&updated).await.unwrap();

        let loaded = store.load_conversation("c1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.created_at, original.created_at);
        assert!(loaded.updated_at >= loaded.created_at);
    }

    #[tokio::test]
    async fn listing_is_per_user_newest_first_and_capped() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.save_conversation(&conversation(&format!("c{}", i), "u1", i)).await.unwrap();
        }
        store.save_conversation(&conversation("other", "u2", 0)).await.unwrap();

        let listed = store.list_conversations("u1").await.unwrap();
        assert_eq!(listed.len(), 20);
        assert_eq!(listed[0].id, "c0");
        assert!(listed.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
        assert!(listed.iter().all(|s| s.user_id == "u1"));
    }

    #[tokio::test]
    async fn delete_reports_removal() {
        let store = MemoryStore::new();
        store.save_conversation(&conversation("c1", "u1", 0)).await.unwrap();
        assert!(store.delete_conversation("c1").await.unwrap());
        assert!(!store.delete_conversation("c1").await.unwrap());
        assert!(store.load_conversation("c1").await.unwrap().is_none());
    }
}
