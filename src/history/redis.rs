use async_trait::async_trait;
use crate::history::{ sort_and_truncate, ConversationStore, StoreError, MAX_LISTED_CONVERSATIONS };
use crate::models::chat::{
    Conversation,
    ConversationContext,
    ConversationSummary,
    Message,
    SessionContext,
};
use log::error;
use redis::{ Client, AsyncCommands };

/// Hosted backend. Every record is a JSON string under a prefixed key; each
/// user additionally has a sorted set of conversation ids scored by update time.
pub struct RedisStore {
    client: Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn messages_key(&self, session: &SessionContext) -> String {
        format!("{}messages:{}", self.key_prefix, session.session_id)
    }

    fn context_key(&self, session: &SessionContext) -> String {
        format!("{}context:{}", self.key_prefix, session.session_id)
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}conversation:{}", self.key_prefix, id)
    }

    fn user_index_key(&self, user_id: &str) -> String {
        format!("{}user:{}:conversations", self.key_prefix, user_id)
    }
}

#[async_trait]
impl ConversationStore for RedisStore {
    async fn save_messages(
        &self,
        session: &SessionContext,
        messages: &[Message]
    ) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.messages_key(session);
        if messages.is_empty() {
            conn.del::<_, ()>(&key).await?;
            return Ok(());
        }
        let json = serde_json::to_string(messages)?;
        conn.set::<_, _, ()>(&key, json).await?;
        Ok(())
    }

    async fn load_messages(&self, session: &SessionContext) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.get_connection().await?;
        let stored: Option<String> = conn.get(self.messages_key(session)).await?;
        match stored {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn clear_messages(&self, session: &SessionContext) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(self.messages_key(session)).await?;
        Ok(())
    }

    async fn save_context(
        &self,
        session: &SessionContext,
        context: &ConversationContext
    ) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(context)?;
        conn.set::<_, _, ()>(self.context_key(session), json).await?;
        Ok(())
    }

    async fn load_context(
        &self,
        session: &SessionContext
    ) -> Result<Option<ConversationContext>, StoreError> {
        let mut conn = self.get_connection().await?;
        let stored: Option<String> = conn.get(self.context_key(session)).await?;
        match stored {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn clear_context(&self, session: &SessionContext) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(self.context_key(session)).await?;
        Ok(())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.conversation_key(&conversation.id);

        let mut record = conversation.clone();
        let existing: Option<String> = conn.get(&key).await?;
        if let Some(json) = existing {
            match serde_json::from_str::<Conversation>(&json) {
                Ok(previous) => {
                    record.created_at = previous.created_at;
                }
                Err(e) => error!("Error parsing stored conversation {}: {}", conversation.id, e),
            }
        }
        record.normalize_timestamps();

        let json = serde_json::to_string(&record)?;
        conn.set::<_, _, ()>(&key, json).await?;
        conn.zadd::<_, _, _, ()>(
            self.user_index_key(&record.user_id),
            &record.id,
            record.updated_at.timestamp_millis()
        ).await?;
        Ok(())
    }

    async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrevrange(
            self.user_index_key(user_id),
            0,
            (MAX_LISTED_CONVERSATIONS as isize) - 1
        ).await?;

        let mut summaries = Vec::with_capacity(ids.len());
        for id in &ids {
            let stored: Option<String> = conn.get(self.conversation_key(id)).await?;
            let Some(json) = stored else {
                continue;
            };
            match serde_json::from_str::<Conversation>(&json) {
                Ok(conversation) => summaries.push(conversation.summary()),
                Err(e) => error!("Error parsing conversation entry {}: {}", id, e),
            }
        }
        Ok(sort_and_truncate(summaries))
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let stored: Option<String> = conn.get(self.conversation_key(id)).await?;
        match stored {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let Some(conversation) = self.load_conversation(id).await? else {
            return Ok(false);
        };
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(self.conversation_key(id)).await?;
        conn.zrem::<_, _, ()>(self.user_index_key(&conversation.user_id), id).await?;
        Ok(true)
    }
}
