pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, Future };
use serde::Deserialize;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use super::LlmConfig;
use self::openai::OpenAIChatClient;
use crate::models::chat::ChatMessage;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, Box<dyn StdError + Send + Sync>>> + Send>>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        request: &ChatRequest
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>>;

    /// Opens a token stream. Failures before the first delta (connect errors,
    /// non-success status) are returned here, not through the stream.
    async fn stream_chat(
        &self,
        request: &ChatRequest
    ) -> Result<ChatStream, Box<dyn StdError + Send + Sync>>;

    fn get_model(&self) -> String;
}

pub fn create_streaming_response<T, F, Fut>(
    response_fn: F
) -> Pin<Box<dyn Stream<Item = T> + Send>>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Sender<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Builds the upstream client, or `None` when no credential is configured.
pub fn new_client(
    config: &LlmConfig
) -> Result<Option<Arc<dyn ChatClient>>, Box<dyn StdError + Send + Sync>> {
    if config.api_key.is_none() {
        return Ok(None);
    }
    let specific_client = OpenAIChatClient::from_config(config)?;
    Ok(Some(Arc::new(specific_client)))
}
