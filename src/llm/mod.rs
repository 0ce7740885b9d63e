pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

/// Providers that speak the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    OpenAI,
    Groq,
    XAI,
    DeepSeek,
}

impl LlmType {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmType::OpenAI => "https://api.openai.com",
            LlmType::Groq => "https://api.groq.com/openai",
            LlmType::XAI => "https://api.x.ai",
            LlmType::DeepSeek => "https://api.deepseek.com",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LlmType::OpenAI => "OpenAI",
            LlmType::Groq => "Groq",
            LlmType::XAI => "xAI",
            LlmType::DeepSeek => "DeepSeek",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}
impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LlmType::OpenAI),
            "groq" => Ok(LlmType::Groq),
            "xai" => Ok(LlmType::XAI),
            "deepseek" => Ok(LlmType::DeepSeek),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::OpenAI,
            api_key: None,
            completion_model: None,
            base_url: None,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

impl LlmConfig {
    pub fn from_args(args: &crate::cli::Args) -> Result<Self, ParseLlmTypeError> {
        Ok(Self {
            llm_type: args.chat_llm_type.parse()?,
            api_key: Some(args.chat_api_key.trim().to_string()).filter(|k| !k.is_empty()),
            completion_model: Some(args.chat_model.clone()).filter(|m| !m.is_empty()),
            base_url: args.chat_base_url.clone().filter(|u| !u.trim().is_empty()),
            max_tokens: args.chat_max_tokens,
            temperature: args.chat_temperature,
        })
    }
}
