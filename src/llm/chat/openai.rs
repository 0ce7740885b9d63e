use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::{ create_streaming_response, ChatClient, ChatRequest, ChatStream, CompletionResponse };
use crate::llm::{ LlmConfig, LlmType };

pub struct OpenAIChatClient {
    http: HttpClient,
    llm_type: LlmType,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    #[serde(rename = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    content: Option<String>,
}

/// What one line of the upstream event stream amounts to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamLine {
    Deltas(Vec<String>, bool),
    Done,
    Skip,
}

pub(crate) fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return StreamLine::Done;
    }

    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(stream_resp) => {
            let mut deltas = Vec::new();
            let mut stopped = false;
            for choice in stream_resp.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        deltas.push(content);
                    }
                }
                if choice.finish_reason.as_deref() == Some("stop") {
                    stopped = true;
                }
            }
            StreamLine::Deltas(deltas, stopped)
        }
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            StreamLine::Skip
        }
    }
}

impl OpenAIChatClient {
    pub fn new(
        llm_type: LlmType,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: u32,
        temperature: f32
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gpt-3.5-turbo".to_string());
        let api_url = base_url.unwrap_or_else(|| llm_type.default_base_url().to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                format!("Invalid API key format: {}", e)
            )?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            llm_type,
            model: chat_model,
            base_url: api_url,
            max_tokens,
            temperature,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| format!("{} API key is required", config.llm_type.display_name()))?;

        Self::new(
            config.llm_type,
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.max_tokens,
            config.temperature
        )
    }

    fn chat_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.model.clone(),
            messages: request.messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: self.temperature,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            stream: if stream { Some(true) } else { None },
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(
        &self,
        request: &ChatRequest
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let req = self.build_request(request, false);

        let resp = self.http
            .post(self.chat_url())
            .json(&req)
            .send().await?
            .error_for_status()?
            .json::<OpenAIResponse>().await?;

        let content = resp.choices
            .first()
            .ok_or_else(|| format!("No response from {} API", self.llm_type.display_name()))?
            .message.content.clone();

        Ok(CompletionResponse { response: content })
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest
    ) -> Result<ChatStream, Box<dyn StdError + Send + Sync>> {
        let req = self.build_request(request, true);

        let resp = self.http.post(self.chat_url()).json(&req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(
                format!("{} API returned {}: {}", self.llm_type.display_name(), status, body).into()
            );
        }

        let provider = self.llm_type.display_name();
        Ok(
            create_streaming_response(move |tx| async move {
                let mut bytes = resp.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();

                while let Some(chunk_result) = bytes.next().await {
                    let chunk = match chunk_result {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!("{} stream read failed: {}", provider, e);
                            let _ = tx.send(Err(Box::new(e) as Box<dyn StdError + Send + Sync>)).await;
                            return;
                        }
                    };
                    // Lines are split on raw bytes so multi-byte characters survive chunking.
                    buffer.extend_from_slice(&chunk);

                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        match parse_stream_line(&line) {
                            StreamLine::Deltas(deltas, stopped) => {
                                for delta in deltas {
                                    if tx.send(Ok(delta)).await.is_err() {
                                        return;
                                    }
                                }
                                if stopped {
                                    return;
                                }
                            }
                            StreamLine::Done => {
                                return;
                            }
                            StreamLine::Skip => {}
                        }
                    }
                }
            })
        )
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
