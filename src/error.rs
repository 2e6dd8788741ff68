use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::stt::SttError;
use crate::tools::ToolError;
use crate::tts::TtsError;

pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("STT error: {0}")]
    Stt(#[from] SttError),

    #[error("TTS error: {0}")]
    Tts(#[from] TtsError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Wakeword error: {0}")]
    Wakeword(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssistantError {
    /// True for errors caused by a cancelled supervisor rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AssistantError::Cancelled
                | AssistantError::Stt(SttError::Cancelled)
                | AssistantError::Tts(TtsError::Cancelled)
                | AssistantError::Audio(AudioError::Cancelled)
        )
    }
}
