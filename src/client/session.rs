use chrono::Utc;
use log::{ debug, info, warn };
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use super::consumer::{ apology, FlushPolicy, StreamConsumer, StreamOutcome };
use super::ClientError;
use crate::history::ConversationStore;
use crate::models::api::{ ChatApiRequest, ConversationNameResponse, StatusResponse };
use crate::models::chat::{
    generate_title,
    ChatMessage,
    Conversation,
    ConversationSummary,
    Message,
    Role,
    SessionContext,
};

pub const NEW_CHAT_TITLE: &str = "New Chat";
const FALLBACK_ERROR: &str = "Error fetching chat response";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Loading,
    Error,
}

/// Client-side state of one chat window.
///
/// At most one response is in flight. Cancellation goes through the token
/// returned by [`ChatSession::cancel_handle`], which can be fired from any task
/// while `send` or `retry` is running.
pub struct ChatSession {
    http: HttpClient,
    base_url: String,
    context: SessionContext,
    messages: Vec<Message>,
    status: SessionStatus,
    title: String,
    last_error: Option<String>,
    policy: FlushPolicy,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_context(base_url, SessionContext::anonymous())
    }

    pub fn with_context(base_url: impl Into<String>, context: SessionContext) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            context,
            messages: Vec::new(),
            status: SessionStatus::Idle,
            title: NEW_CHAT_TITLE.to_string(),
            last_error: None,
            policy: FlushPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// The conversation id doubles as the session id.
    pub fn conversation_id(&self) -> &str {
        &self.context.session_id
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Token for the response in flight (or the next one if idle).
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the response in flight and returns to `Idle`.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if self.status == SessionStatus::Loading {
            self.settle(StreamOutcome::Cancelled);
        }
        self.cancel = CancellationToken::new();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a user message and streams the reply into a new assistant turn.
    /// Blank input is ignored (`Ok(None)`). `on_update` receives the full
    /// assistant content after every flush.
    pub async fn send<F>(&mut self, content: &str, on_update: F) -> Result<Option<StreamOutcome>, ClientError>
        where F: FnMut(&str)
    {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        if self.status == SessionStatus::Loading {
            return Err(ClientError::Busy);
        }

        if self.title == NEW_CHAT_TITLE && !self.messages.iter().any(|m| m.role == Role::User) {
            self.title = generate_title(content);
        }
        self.messages.push(Message::user(content));
        self.deliver(on_update).await.map(Some)
    }

    /// Drops the failed assistant turn and resends the trailing user message.
    pub async fn retry<F>(&mut self, on_update: F) -> Result<Option<StreamOutcome>, ClientError>
        where F: FnMut(&str)
    {
        if self.status == SessionStatus::Loading {
            return Err(ClientError::Busy);
        }
        while let Some(last) = self.messages.last() {
            if last.role == Role::Assistant && (last.is_error || last.content.is_empty()) {
                self.messages.pop();
            } else {
                break;
            }
        }
        match self.messages.last() {
            Some(last) if last.role == Role::User => self.deliver(on_update).await.map(Some),
            _ => Ok(None),
        }
    }

    async fn deliver<F>(&mut self, mut on_update: F) -> Result<StreamOutcome, ClientError>
        where F: FnMut(&str)
    {
        let history: Vec<ChatMessage> = self.messages.iter().map(Message::to_chat_message).collect();
        let request = ChatApiRequest {
            messages: Some(history),
            session_id: Some(self.context.session_id.clone()),
            user_id: Some(self.context.user_id.clone()),
        };

        self.messages.push(Message::streaming_placeholder());
        self.status = SessionStatus::Loading;
        self.last_error = None;
        let cancel = self.cancel.clone();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.http.post(self.url("/api/chat")).json(&request).send() => Some(result),
        };

        let response = match sent {
            None => {
                return Ok(self.settle(StreamOutcome::Cancelled));
            }
            Some(Err(e)) => {
                warn!("Chat request failed: {}", e);
                self.fail(&e.to_string(), &mut on_update);
                return Err(ClientError::Http(e));
            }
            Some(Ok(response)) => response,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| if text.is_empty() { FALLBACK_ERROR.to_string() } else { text });
            warn!("Chat request rejected with {}: {}", status, message);
            self.fail(&message, &mut on_update);
            return Err(ClientError::Status { status, message });
        }

        let consumer = StreamConsumer::new(self.policy, cancel);
        let messages = &mut self.messages;
        let outcome = consumer.consume(response.bytes_stream(), |delta| {
            if let Some(reply) = messages.last_mut() {
                if reply.append(delta) {
                    on_update(&reply.content);
                }
            }
        }).await;

        Ok(self.settle(outcome))
    }

    /// Renders a failure that happened before any frame as an inline apology.
    fn fail<F: FnMut(&str)>(&mut self, message: &str, on_update: &mut F) {
        if let Some(reply) = self.messages.last_mut() {
            if reply.append(&apology(message)) {
                on_update(&reply.content);
            }
        }
        self.settle(StreamOutcome::Failed(message.to_string()));
    }

    fn settle(&mut self, outcome: StreamOutcome) -> StreamOutcome {
        if let Some(reply) = self.messages.last_mut() {
            if reply.is_streaming {
                reply.finish();
                if let StreamOutcome::Failed(_) = outcome {
                    reply.is_error = true;
                }
            }
        }

        match &outcome {
            StreamOutcome::Completed | StreamOutcome::Closed => {
                self.status = SessionStatus::Idle;
            }
            StreamOutcome::Cancelled => {
                if matches!(self.messages.last(), Some(m) if m.role == Role::Assistant && m.content.is_empty()) {
                    self.messages.pop();
                }
                debug!("Response cancelled for session {}", self.context.session_id);
                self.status = SessionStatus::Idle;
            }
            StreamOutcome::Failed(message) => {
                self.status = SessionStatus::Error;
                self.last_error = Some(message.clone());
            }
        }

        self.cancel = CancellationToken::new();
        outcome
    }

    /// Writes the message list and the conversation record.
    pub async fn persist(&self, store: &dyn ConversationStore) -> Result<(), ClientError> {
        let Some(first) = self.messages.first() else {
            return Ok(());
        };
        store.save_messages(&self.context, &self.messages).await?;

        let title = if self.title == NEW_CHAT_TITLE {
            generate_title(&first.content)
        } else {
            self.title.clone()
        };
        let conversation = Conversation {
            id: self.context.session_id.clone(),
            user_id: self.context.user_id.clone(),
            title,
            messages: self.messages.clone(),
            created_at: first.created_at,
            updated_at: Utc::now(),
        };
        store.save_conversation(&conversation).await?;
        Ok(())
    }

    fn reset(&mut self, context: SessionContext) {
        self.context = context;
        self.messages.clear();
        self.status = SessionStatus::Idle;
        self.title = NEW_CHAT_TITLE.to_string();
        self.last_error = None;
    }

    /// Saves the current conversation and starts a fresh session for the same user.
    pub async fn new_conversation(&mut self, store: &dyn ConversationStore) -> Result<(), ClientError> {
        self.cancel();
        self.persist(store).await?;
        let next = self.context.with_new_session();
        store.clear_messages(&next).await?;
        store.clear_context(&next).await?;
        info!("Started conversation {}", next.session_id);
        self.reset(next);
        Ok(())
    }

    /// Discards the current messages and context, then rotates the session.
    pub async fn clear(&mut self, store: &dyn ConversationStore) -> Result<(), ClientError> {
        self.cancel();
        store.clear_messages(&self.context).await?;
        store.clear_context(&self.context).await?;
        let next = self.context.with_new_session();
        self.reset(next);
        Ok(())
    }

    /// Switches to a stored conversation. Returns `false` if it does not exist.
    pub async fn select_conversation(
        &mut self,
        store: &dyn ConversationStore,
        id: &str
    ) -> Result<bool, ClientError> {
        let Some(conversation) = store.load_conversation(id).await? else {
            warn!("Conversation not found: {}", id);
            return Ok(false);
        };

        self.cancel();
        self.context = SessionContext::new(conversation.id, self.context.user_id.clone());
        self.messages = conversation.messages;
        self.title = if conversation.title.is_empty() {
            "Conversation".to_string()
        } else {
            conversation.title
        };
        self.status = SessionStatus::Idle;
        self.last_error = None;
        Ok(true)
    }

    /// Removes a stored conversation. Deleting the open one moves the session
    /// to a fresh conversation without saving the deleted messages back.
    pub async fn delete_conversation(
        &mut self,
        store: &dyn ConversationStore,
        id: &str
    ) -> Result<bool, ClientError> {
        if !store.delete_conversation(id).await? {
            return Ok(false);
        }
        info!("Deleted conversation {}", id);

        if id == self.context.session_id {
            self.cancel();
            store.clear_messages(&self.context).await?;
            store.clear_context(&self.context).await?;
            let next = self.context.with_new_session();
            self.reset(next);
        }
        Ok(true)
    }

    pub async fn conversations(&self, store: &dyn ConversationStore) -> Result<Vec<ConversationSummary>, ClientError> {
        Ok(store.list_conversations(&self.context.user_id).await?)
    }

    /// Asks the server for a short label and adopts it as the title.
    pub async fn request_name(&mut self) -> Result<String, ClientError> {
        let request = ChatApiRequest {
            messages: Some(self.messages.iter().map(Message::to_chat_message).collect()),
            ..ChatApiRequest::default()
        };
        let response = self.http.post(self.url("/api/conversation-name")).json(&request).send().await?;
        let status = response.status();
        let body: ConversationNameResponse = response.json().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| body.name.clone()),
            });
        }
        self.title = body.name.clone();
        Ok(body.name)
    }

    pub async fn server_status(&self) -> Result<StatusResponse, ClientError> {
        let response = self.http.get(self.url("/api/status")).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;

    fn session_with(messages: Vec<Message>) -> ChatSession {
        let mut session = ChatSession::new("http://127.0.0.1:9");
        session.messages = messages;
        session
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let mut session = ChatSession::new("http://127.0.0.1:9");
        let outcome = session.send("   ", |_| {}).await.unwrap();
        assert!(outcome.is_none());
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn sends_are_rejected_while_loading() {
        let mut session = ChatSession::new("http://127.0.0.1:9");
        session.status = SessionStatus::Loading;
        assert!(matches!(session.send("hello", |_| {}).await, Err(ClientError::Busy)));
        assert!(matches!(session.retry(|_| {}).await, Err(ClientError::Busy)));
    }

    #[test]
    fn cancel_returns_to_idle_and_drops_empty_placeholder() {
        let mut session = session_with(vec![Message::user("hi"), Message::streaming_placeholder()]);
        session.status = SessionStatus::Loading;
        let handle = session.cancel_handle();

        session.cancel();

        assert!(handle.is_cancelled());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.messages().len(), 1);
        assert!(!session.cancel_handle().is_cancelled());
    }

    #[tokio::test]
    async fn unreachable_server_shows_inline_error() {
        let mut session = ChatSession::new("http://127.0.0.1:9");
        let mut seen = String::new();
        let result = session.send("hello there", |content| seen = content.to_string()).await;

        assert!(matches!(result, Err(ClientError::Http(_))));
        assert_eq!(session.status(), SessionStatus::Error);
        let reply = session.messages().last().unwrap();
        assert!(reply.is_error);
        assert!(!reply.is_streaming);
        assert!(reply.content.starts_with("\n\nI apologize, but I encountered an error: "));
        assert_eq!(seen, reply.content);
        assert_eq!(session.title(), "hello there");
    }

    #[tokio::test]
    async fn persist_then_select_round_trips() {
        let store = MemoryStore::new();
        let mut session = session_with(vec![Message::user("Plan a trip"), Message::assistant("Where to?")]);
        session.persist(&store).await.unwrap();
        let id = session.conversation_id().to_string();

        session.new_conversation(&store).await.unwrap();
        assert_ne!(session.conversation_id(), id);
        assert!(session.messages().is_empty());
        assert_eq!(session.title(), NEW_CHAT_TITLE);

        let listed = session.conversations(&store).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Plan a trip");

        assert!(session.select_conversation(&store, &id).await.unwrap());
        assert_eq!(session.conversation_id(), id);
        assert_eq!(session.messages().len(), 2);
        assert!(!session.select_conversation(&store, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn clear_discards_session_state() {
        let store = MemoryStore::new();
        let mut session = session_with(vec![Message::user("hello")]);
        session.persist(&store).await.unwrap();
        let before = session.context().clone();

        session.clear(&store).await.unwrap();

        assert!(store.load_messages(&before).await.unwrap().is_empty());
        assert_ne!(session.context().session_id, before.session_id);
        assert_eq!(session.context().user_id, before.user_id);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn deleting_the_open_conversation_starts_a_new_one() {
        let store = MemoryStore::new();
        let mut session = session_with(vec![Message::user("Old topic")]);
        session.persist(&store).await.unwrap();
        let old = session.context().clone();
        session.new_conversation(&store).await.unwrap();

        session.messages.push(Message::user("Current topic"));
        session.persist(&store).await.unwrap();
        let current = session.context().clone();

        assert!(session.delete_conversation(&store, &old.session_id).await.unwrap());
        assert_eq!(session.conversation_id(), current.session_id);
        assert_eq!(session.messages().len(), 1);

        assert!(session.delete_conversation(&store, &current.session_id).await.unwrap());
        assert_ne!(session.conversation_id(), current.session_id);
        assert_eq!(session.context().user_id, current.user_id);
        assert!(session.messages().is_empty());
        assert_eq!(session.title(), NEW_CHAT_TITLE);
        assert!(store.load_messages(&current).await.unwrap().is_empty());
        assert!(session.conversations(&store).await.unwrap().is_empty());

        assert!(!session.delete_conversation(&store, "missing").await.unwrap());
    }
}
