pub mod context;
pub mod gemini;
pub mod groq;
pub mod interpret;
pub mod prompts;

pub use context::{ConversationHistory, ConversationMessage, Role};
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use interpret::{interpret, parse_parameters, ParameterParseError};
pub use prompts::SystemPrompt;

use crate::tools::{ToolCall, ToolInfo};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Spoken when the model cannot be reached
pub const APOLOGY: &str = "I'm sorry, I couldn't reach my language service. Please try again.";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.3,
            max_tokens: Some(1024),
            timeout: Duration::from_secs(60), // LLM calls can be slow
        }
    }
}

/// Interpreted model output
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// What to say
    pub text: String,
    /// Calls to run, in order
    pub tool_calls: Vec<ToolCall>,
    pub should_use_tools: bool,
}

impl LlmResponse {
    pub fn conversational(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            should_use_tools: false,
        }
    }

    pub fn with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let should_use_tools = !tool_calls.is_empty();
        Self {
            text: text.into(),
            tool_calls,
            should_use_tools,
        }
    }

    pub fn apology() -> Self {
        Self::conversational(APOLOGY)
    }
}

/// A hosted text model that answers in free text
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// True when credentials are present
    fn is_configured(&self) -> bool;

    /// Raw completion for `transcript` given earlier conversation
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ConversationMessage],
        transcript: &str,
    ) -> Result<String, LlmError>;

    /// Ask the model and interpret its answer. Provider failures become an apology.
    async fn generate(
        &self,
        transcript: &str,
        tools: &[ToolInfo],
        history: &[ConversationMessage],
    ) -> LlmResponse {
        if !self.is_configured() {
            log::error!("🤖 {} has no API key configured", self.name());
            return LlmResponse::apology();
        }

        let system_prompt = SystemPrompt::build(tools);
        log::debug!("🤖 Asking {} ({} history messages)", self.name(), history.len());
        match self.complete(&system_prompt, history, transcript).await {
            Ok(text) => {
                log::debug!("🤖 Raw response: {}", text);
                interpret(&text)
            }
            Err(e) => {
                log::error!("🤖 {} request failed: {}", self.name(), e);
                LlmResponse::apology()
            }
        }
    }
}

/// Shared error mapping for non-2xx responses
pub(crate) async fn api_error(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    LlmError::ApiError { status, message }
}
