use log::{ debug, warn };
use std::collections::HashMap;
use std::sync::Arc;
use crate::history::{ update_context, ConversationStore };
use crate::models::chat::{ Message, Role, SessionContext };

pub const CONTEXT_HEADER: &str = "CURRENT CONVERSATION CONTEXT:";
const MAX_TOPICS: usize = 3;
const MIN_TOPIC_LEN: usize = 5;

pub const SYSTEM_PROMPT: &str = "You are Chat Buddy, a friendly and intelligent chat companion designed to be highly context-aware.

IMPORTANT CONTEXT GUIDELINES:
- Actively refer back to previous parts of the conversation when relevant
- Maintain continuity by acknowledging what has been discussed before
- Remember details the user has shared and incorporate them in your responses
- If the user asks follow-up questions, connect them to previous context
- Avoid asking for information the user has already provided
- If you're unsure about something mentioned earlier, you can reference it and ask for clarification

Be helpful, accurate, friendly, and conversational in your responses.";

/// Facts derived from the message history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextHints {
    pub message_count: usize,
    pub topics: Vec<String>,
    pub previous_question: Option<String>,
}

impl ContextHints {
    /// `None` for histories of one message or less.
    pub fn extract(messages: &[Message]) -> Option<Self> {
        if messages.len() <= 1 {
            return None;
        }

        let user_messages: Vec<&Message> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .collect();

        let previous_question = user_messages
            .len()
            .checked_sub(2)
            .map(|i| user_messages[i].content.clone());

        Some(Self {
            message_count: messages.len(),
            topics: top_words(user_messages.iter().map(|m| m.content.as_str())),
            previous_question,
        })
    }

    pub fn render(&self) -> String {
        let mut block = String::new();
        if !self.topics.is_empty() {
            block.push_str(&format!("\nPotential topics of interest: {}", self.topics.join(", ")));
        }
        block.push_str(&format!("\nConversation length: {} messages", self.message_count));
        if let Some(question) = &self.previous_question {
            block.push_str(&format!("\nPrevious question: \"{}\"", question));
        }
        block
    }
}

/// Most frequent case-folded, punctuation-stripped words longer than four
/// characters. Ties keep first-seen order.
pub fn top_words<'a>(texts: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for text in texts {
        for raw in text.split_whitespace() {
            let word: String = raw
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase();
            if word.chars().count() < MIN_TOPIC_LEN {
                continue;
            }
            let count = counts.entry(word.clone()).or_insert(0);
            if *count == 0 {
                order.push(word);
            }
            *count += 1;
        }
    }

    // Stable sort keeps first-encountered order among equal counts.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(MAX_TOPICS);
    order
}

/// Pure prompt construction, no persistence.
pub fn enhance_prompt(base_prompt: &str, messages: &[Message]) -> String {
    match ContextHints::extract(messages) {
        Some(hints) => format!("{}\n\n{}{}", base_prompt, CONTEXT_HEADER, hints.render()),
        None => base_prompt.to_string(),
    }
}

pub struct ContextAugmenter {
    store: Arc<dyn ConversationStore>,
}

impl ContextAugmenter {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Appends the context block and refreshes the cached
    /// `ConversationContext`. Never fails: persistence errors are logged.
    pub async fn augment(
        &self,
        session: &SessionContext,
        base_prompt: &str,
        messages: &[Message]
    ) -> String {
        let Some(hints) = ContextHints::extract(messages) else {
            return base_prompt.to_string();
        };

        let count = hints.message_count;
        let topics = hints.topics.clone();
        let refreshed = update_context(self.store.as_ref(), session, move |ctx| {
            ctx.message_count = count;
            if !topics.is_empty() {
                ctx.topic = topics.first().cloned();
                ctx.detected_entities = Some(topics);
            }
        }).await;

        match refreshed {
            Ok(ctx) => debug!("Context for session {} now at {} messages", session.session_id, ctx.message_count),
            Err(e) => warn!("Failed to persist conversation context for {}: {}", session.session_id, e),
        }

        format!("{}\n\n{}{}", base_prompt, CONTEXT_HEADER, hints.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ MemoryStore, StoreError };
    use crate::models::chat::{ Conversation, ConversationContext, ConversationSummary };
    use async_trait::async_trait;

    /// Store whose every call fails, as an unreachable database would.
    struct OfflineStore;

    fn offline<T>() -> Result<T, StoreError> {
        Err(StoreError::Backend("database offline".into()))
    }

    #[async_trait]
    impl ConversationStore for OfflineStore {
        async fn save_messages(&self, _: &SessionContext, _: &[Message]) -> Result<(), StoreError> {
            offline()
        }
        async fn load_messages(&self, _: &SessionContext) -> Result<Vec<Message>, StoreError> {
            offline()
        }
        async fn clear_messages(&self, _: &SessionContext) -> Result<(), StoreError> {
            offline()
        }
        async fn save_context(
            &self,
            _: &SessionContext,
            _: &ConversationContext
        ) -> Result<(), StoreError> {
            offline()
        }
        async fn load_context(
            &self,
            _: &SessionContext
        ) -> Result<Option<ConversationContext>, StoreError> {
            offline()
        }
        async fn clear_context(&self, _: &SessionContext) -> Result<(), StoreError> {
            offline()
        }
        async fn save_conversation(&self, _: &Conversation) -> Result<(), StoreError> {
            offline()
        }
        async fn list_conversations(&self, _: &str) -> Result<Vec<ConversationSummary>, StoreError> {
            offline()
        }
        async fn load_conversation(&self, _: &str) -> Result<Option<Conversation>, StoreError> {
            offline()
        }
        async fn delete_conversation(&self, _: &str) -> Result<bool, StoreError> {
            offline()
        }
    }

    fn history(turns: &[(Role, &str)]) -> Vec<Message> {
        turns.iter().map(|(role, text)| Message::new(*role, *text)).collect()
    }

    #[test]
    fn short_histories_are_untouched() {
        assert_eq!(enhance_prompt("base", &[]), "base");
        assert_eq!(enhance_prompt("base", &history(&[(Role::User, "hello there")])), "base");
    }

    #[test]
    fn renders_full_block() {
        let messages = history(&[
            (Role::User, "Tell me about Rust traits."),
            (Role::Assistant, "Traits define shared behaviour."),
            (Role::User, "How do traits compare to interfaces?"),
        ]);
        let prompt = enhance_prompt("base", &messages);
        assert_eq!(
            prompt,
            "base\n\nCURRENT CONVERSATION CONTEXT:\n\
             Potential topics of interest: traits, about, compare\n\
             Conversation length: 3 messages\n\
             Previous question: \"Tell me about Rust traits.\""
        );
    }

    #[test]
    fn omits_optional_lines() {
        let messages = history(&[(Role::User, "hi"), (Role::Assistant, "Hello!")]);
        assert_eq!(
            enhance_prompt("base", &messages),
            "base\n\nCURRENT CONVERSATION CONTEXT:\nConversation length: 2 messages"
        );
    }

    #[test]
    fn ranks_by_frequency_then_first_seen() {
        let topics = top_words(
            ["zebra apple! Apple mango", "mango, apple zebra? lemon"].into_iter()
        );
        assert_eq!(topics, vec!["apple", "zebra", "mango"]);
    }

    #[test]
    fn ignores_short_words_after_stripping() {
        assert!(top_words(["a big cat's hat!!!"].into_iter()).is_empty());
    }

    #[tokio::test]
    async fn augment_is_idempotent_and_refreshes_cache() {
        let store = Arc::new(MemoryStore::new());
        let augmenter = ContextAugmenter::new(store.clone());
        let session = SessionContext::anonymous();
        let messages = history(&[
            (Role::User, "Planning a garden"),
            (Role::Assistant, "Lovely!"),
            (Role::User, "Which garden plants grow fastest?"),
        ]);

        let first = augmenter.augment(&session, SYSTEM_PROMPT, &messages).await;
        let second = augmenter.augment(&session, SYSTEM_PROMPT, &messages).await;
        assert_eq!(first, second);
        assert!(first.starts_with(SYSTEM_PROMPT));

        let ctx = store.load_context(&session).await.unwrap().unwrap();
        assert_eq!(ctx.message_count, 3);
        assert_eq!(ctx.topic.as_deref(), Some("garden"));
    }

    #[tokio::test]
    async fn augment_survives_store_failures() {
        let augmenter = ContextAugmenter::new(Arc::new(OfflineStore));
        let messages = history(&[
            (Role::User, "Tell me about Rust traits."),
            (Role::Assistant, "Traits define shared behaviour."),
            (Role::User, "How do traits compare to interfaces?"),
        ]);

        let prompt = augmenter.augment(&SessionContext::anonymous(), "base", &messages).await;
        assert_eq!(prompt, enhance_prompt("base", &messages));
        assert!(prompt.contains("Potential topics of interest: traits, about, compare"));
        assert!(prompt.contains("Conversation length: 3 messages"));
        assert!(prompt.contains("Previous question: \"Tell me about Rust traits.\""));
    }
}
