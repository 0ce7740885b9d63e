mod fallback;
mod memory;
mod redis;

pub use fallback::FallbackStore;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use chrono::Utc;
use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;
use crate::cli::Args;
use crate::models::chat::{
    Conversation,
    ConversationContext,
    ConversationSummary,
    Message,
    SessionContext,
};

/// Maximum number of conversations returned by a listing.
pub const MAX_LISTED_CONVERSATIONS: usize = 20;

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence for message lists, context blobs and conversation records.
/// Implementations only promise read-after-write within one process.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_messages(
        &self,
        session: &SessionContext,
        messages: &[Message]
    ) -> Result<(), StoreError>;

    async fn load_messages(&self, session: &SessionContext) -> Result<Vec<Message>, StoreError>;

    async fn clear_messages(&self, session: &SessionContext) -> Result<(), StoreError>;

    async fn save_context(
        &self,
        session: &SessionContext,
        context: &ConversationContext
    ) -> Result<(), StoreError>;

    async fn load_context(
        &self,
        session: &SessionContext
    ) -> Result<Option<ConversationContext>, StoreError>;

    async fn clear_context(&self, session: &SessionContext) -> Result<(), StoreError>;

    /// Insert or replace by id. An existing record keeps its `created_at`.
    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Newest `updated_at` first, at most [`MAX_LISTED_CONVERSATIONS`].
    async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Returns whether a conversation was removed.
    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError>;
}

/// Loads the session context (or starts a fresh one), applies `apply` and
/// writes it back with a refreshed `last_update_time`.
pub async fn update_context<F>(
    store: &dyn ConversationStore,
    session: &SessionContext,
    apply: F
) -> Result<ConversationContext, StoreError>
    where F: FnOnce(&mut ConversationContext) + Send
{
    let mut context = store.load_context(session).await?.unwrap_or_default();
    apply(&mut context);
    context.last_update_time = Utc::now();
    store.save_context(session, &context).await?;
    Ok(context)
}

pub(crate) fn sort_and_truncate(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries.truncate(MAX_LISTED_CONVERSATIONS);
    summaries
}

pub fn create_store(args: &Args) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "memory" | "local" => Ok(Arc::new(MemoryStore::new())),
        "redis" => {
            let hosted = RedisStore::new(&args.history_host, &args.history_redis_prefix)?;
            if args.history_fallback {
                info!("Hosted store failures will fall back to the in-process store.");
                Ok(Arc::new(FallbackStore::new(Arc::new(hosted), Arc::new(MemoryStore::new()))))
            } else {
                warn!("Hosted store configured without a fallback.");
                Ok(Arc::new(hosted))
            }
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_store(args: &Args) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    info!("Conversations will be stored in: {} at {}", args.history_type, args.history_host);
    create_store(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test]
    async fn update_context_creates_then_refreshes() {
        let store = MemoryStore::new();
        let session = SessionContext::anonymous();

        let first = update_context(&store, &session, |ctx| {
            ctx.message_count = 2;
        }).await.unwrap();
        let second = update_context(&store, &session, |ctx| {
            ctx.message_count = 4;
        }).await.unwrap();

        assert_eq!(first.start_time, second.start_time);
        assert!(second.last_update_time >= first.last_update_time);
        let stored = store.load_context(&session).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 4);
    }

    #[test]
    fn rejects_unknown_store_type() {
        let args = Args::parse_from(["chat-buddy", "--history-type", "sqlite"]);
        assert!(create_store(&args).is_err());
    }

    #[test]
    fn redis_store_is_created_lazily() {
        // Client::open only validates the URL; no connection is made here.
        let args = Args::parse_from([
            "chat-buddy",
            "--history-type",
            "redis",
            "--history-host",
            "redis://127.0.0.1:1",
        ]);
        assert!(create_store(&args).is_ok());
    }
}
