use chrono::Utc;
use futures::{ Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::cli::Args;
use crate::context::{ ContextAugmenter, SYSTEM_PROMPT };
use crate::llm::chat::{ create_streaming_response, ChatClient, ChatRequest };
use crate::mock::{ mock_conversation_name, MockResponder };
use crate::models::chat::{ ChatMessage, Message, Role, SessionContext };
use crate::models::stream::StreamFrame;

pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

pub const INVALID_MESSAGES: &str = "Messages are required and must be an array";
pub const DEFAULT_CONVERSATION_NAME: &str = "New Conversation";

const NAMING_PROMPT: &str =
    "You are an assistant that generates short, descriptive names for conversations based on their content. Respond with ONLY the name, nothing else. Keep it under 5 words and relevant to the topic. Don't use quotation marks.";
const NAMING_MESSAGES: usize = 3;
const NAMING_MAX_TOKENS: u32 = 20;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Upstream(String),
}

impl RelayError {
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::InvalidRequest(_) => 400,
            RelayError::Upstream(_) => 500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Idle => "idle",
            RelayState::Streaming => "streaming",
            RelayState::Completed => "completed",
            RelayState::Aborted => "aborted",
            RelayState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one request through the relay and logs every transition.
struct RelayRun {
    id: String,
    state: RelayState,
}

impl RelayRun {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            state: RelayState::Idle,
        }
    }

    fn advance(&mut self, next: RelayState) {
        debug!("Relay {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MockStreamSettings {
    pub batch_size: usize,
    pub delay: Duration,
}

impl Default for MockStreamSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            delay: Duration::from_millis(30),
        }
    }
}

impl MockStreamSettings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            batch_size: args.mock_batch_size.max(1),
            delay: Duration::from_millis(args.mock_delay_ms),
        }
    }
}

/// Rejects a missing or empty message list before any frame is produced.
pub fn validate_messages(messages: Option<Vec<ChatMessage>>) -> Result<Vec<ChatMessage>, RelayError> {
    match messages {
        Some(messages) if !messages.is_empty() => Ok(messages),
        _ => Err(RelayError::InvalidRequest(INVALID_MESSAGES.to_string())),
    }
}

/// Splits on character boundaries into pieces of at most `batch_size` chars.
pub fn chunk_text(text: &str, batch_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn last_user_message(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.is_user())
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Turns a message list into a framed token stream, either relayed from the
/// upstream provider or synthesized by the mock generator.
pub struct Relay {
    upstream: Option<Arc<dyn ChatClient>>,
    augmenter: ContextAugmenter,
    mock: MockResponder,
    settings: MockStreamSettings,
    cache: Option<ResponseCache>,
}

impl Relay {
    pub fn new(
        upstream: Option<Arc<dyn ChatClient>>,
        augmenter: ContextAugmenter,
        mock: MockResponder,
        settings: MockStreamSettings
    ) -> Self {
        Self {
            upstream,
            augmenter,
            mock,
            settings,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn using_mock(&self) -> bool {
        self.upstream.is_none()
    }

    /// Opens the frame stream for one chat request. An `Err` means nothing has
    /// been sent yet; once a stream is returned it always ends with `Done`.
    pub async fn open(
        &self,
        session: &SessionContext,
        messages: Vec<ChatMessage>
    ) -> Result<FrameStream, RelayError> {
        let messages = validate_messages(Some(messages))?;
        let mut run = RelayRun::start();
        info!("Relay {} opened for session {} with {} messages", run.id, session.session_id, messages.len());

        let Some(upstream) = self.upstream.clone() else {
            let reply = self.mock.generate(last_user_message(&messages), &messages);
            run.advance(RelayState::Streaming);
            return Ok(paced_stream(run, reply, self.settings));
        };

        let history: Vec<Message> = messages.iter().map(Message::from_chat_message).collect();
        let system_prompt = self.augmenter.augment(session, SYSTEM_PROMPT, &history).await;

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&messages).await {
                info!("Relay {} replaying cached response", run.id);
                run.advance(RelayState::Streaming);
                return Ok(paced_stream(run, cached, self.settings));
            }
        }

        let mut prompt = Vec::with_capacity(history.len() + 1);
        prompt.push(ChatMessage::new(Role::System, system_prompt));
        prompt.extend(history.iter().map(Message::to_chat_message));

        let mut upstream_deltas = match upstream.stream_chat(&ChatRequest::new(prompt)).await {
            Ok(deltas) => deltas,
            Err(e) => {
                run.advance(RelayState::Failed);
                error!("Relay {} upstream request failed: {}", run.id, e);
                return Err(RelayError::Upstream(e.to_string()));
            }
        };

        // Nothing has been sent yet, so a failing first item still gets a JSON error.
        let first = match upstream_deltas.next().await {
            Some(Err(e)) => {
                run.advance(RelayState::Failed);
                error!("Relay {} upstream failed before the first delta: {}", run.id, e);
                return Err(RelayError::Upstream(e.to_string()));
            }
            first => first,
        };
        let mut deltas = futures::stream::iter(first).chain(upstream_deltas);
        run.advance(RelayState::Streaming);

        let cache = self.cache.clone();
        Ok(
            create_streaming_response(move |tx: mpsc::Sender<StreamFrame>| async move {
                let mut full = String::new();
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(text) => {
                            full.push_str(&text);
                            if tx.send(StreamFrame::Content(text)).await.is_err() {
                                run.advance(RelayState::Aborted);
                                return;
                            }
                        }
                        Err(e) => {
                            error!("Relay {} upstream stream failed: {}", run.id, e);
                            run.advance(RelayState::Failed);
                            let _ = tx.send(StreamFrame::Error(e.to_string())).await;
                            let _ = tx.send(StreamFrame::Done).await;
                            return;
                        }
                    }
                }

                if tx.send(StreamFrame::Done).await.is_err() {
                    run.advance(RelayState::Aborted);
                    return;
                }
                run.advance(RelayState::Completed);
                if let Some(cache) = cache {
                    cache.put(&messages, &full).await;
                }
            })
        )
    }

    /// Short label for a conversation from its first few messages.
    pub async fn name_conversation(&self, messages: Vec<ChatMessage>) -> Result<String, RelayError> {
        let messages = validate_messages(Some(messages))?;

        let Some(upstream) = &self.upstream else {
            return Ok(mock_conversation_name(&messages, Utc::now().date_naive()));
        };

        let mut prompt = vec![ChatMessage::new(Role::System, NAMING_PROMPT)];
        prompt.extend(
            messages
                .iter()
                .take(NAMING_MESSAGES)
                .map(|m| ChatMessage::new(Role::from_lenient(&m.role), m.content.clone()))
        );

        let request = ChatRequest::new(prompt).max_tokens(NAMING_MAX_TOKENS);
        match upstream.complete(&request).await {
            Ok(resp) => {
                let name = resp.response.trim();
                Ok(if name.is_empty() { DEFAULT_CONVERSATION_NAME.to_string() } else { name.to_string() })
            }
            Err(e) => {
                warn!("Error generating conversation name: {}", e);
                Err(RelayError::Upstream(e.to_string()))
            }
        }
    }
}

fn paced_stream(mut run: RelayRun, text: String, settings: MockStreamSettings) -> FrameStream {
    create_streaming_response(move |tx: mpsc::Sender<StreamFrame>| async move {
        let chunks = chunk_text(&text, settings.batch_size);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            if tx.send(StreamFrame::Content(chunk)).await.is_err() {
                run.advance(RelayState::Aborted);
                return;
            }
            if i < last && !settings.delay.is_zero() {
                tokio::time::sleep(settings.delay).await;
            }
        }
        if tx.send(StreamFrame::Done).await.is_err() {
            run.advance(RelayState::Aborted);
            return;
        }
        run.advance(RelayState::Completed);
    })
}
