use async_trait::async_trait;
use log::warn;
use std::sync::Arc;
use crate::history::{ ConversationStore, StoreError };
use crate::models::chat::{
    Conversation,
    ConversationContext,
    ConversationSummary,
    Message,
    SessionContext,
};

/// Wraps a primary store; any failing call is logged and retried once on the
/// secondary. Writes that fall back only land in the secondary.
pub struct FallbackStore {
    primary: Arc<dyn ConversationStore>,
    secondary: Arc<dyn ConversationStore>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn ConversationStore>, secondary: Arc<dyn ConversationStore>) -> Self {
        Self { primary, secondary }
    }
}

macro_rules! with_fallback {
    ($self:ident, $op:literal, $method:ident($($arg:expr),*)) => {
        match $self.primary.$method($($arg),*).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Primary store failed to {}: {}. Falling back to local store.", $op, e);
                $self.secondary.$method($($arg),*).await
            }
        }
    };
}

#[async_trait]
impl ConversationStore for FallbackStore {
    async fn save_messages(
        &self,
        session: &SessionContext,
        messages: &[Message]
    ) -> Result<(), StoreError> {
        with_fallback!(self, "save messages", save_messages(session, messages))
    }

    async fn load_messages(&self, session: &SessionContext) -> Result<Vec<Message>, StoreError> {
        with_fallback!(self, "load messages", load_messages(session))
    }

    async fn clear_messages(&self, session: &SessionContext) -> Result<(), StoreError> {
        with_fallback!(self, "clear messages", clear_messages(session))
    }

    async fn save_context(
        &self,
        session: &SessionContext,
        context: &ConversationContext
    ) -> Result<(), StoreError> {
        with_fallback!(self, "save context", save_context(session, context))
    }

    async fn load_context(
        &self,
        session: &SessionContext
    ) -> Result<Option<ConversationContext>, StoreError> {
        with_fallback!(self, "load context", load_context(session))
    }

    async fn clear_context(&self, session: &SessionContext) -> Result<(), StoreError> {
        with_fallback!(self, "clear context", clear_context(session))
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        with_fallback!(self, "save conversation", save_conversation(conversation))
    }

    async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        with_fallback!(self, "list conversations", list_conversations(user_id))
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        with_fallback!(self, "load conversation", load_conversation(id))
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        with_fallback!(self, "delete conversation", delete_conversation(id))
    }
}
