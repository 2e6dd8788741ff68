//! The assistant state machine and the components it drives.

mod orchestrator;

pub use orchestrator::AssistantOrchestrator;

use crate::detection::WakeWordListener;
use crate::llm::LlmProvider;
use crate::stt::SpeechToText;
use crate::tools::Toolbox;
use crate::tts::TextToSpeech;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AssistantState {
    Idle,
    ListeningForWakeWord,
    ListeningForCommand,
    Processing,
    Speaking,
    Stopping,
    Error,
}

/// Everything the orchestrator depends on, assembled once by the caller
#[derive(Clone)]
pub struct AssistantComponents {
    pub wake_word: Arc<WakeWordListener>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub llm: Arc<dyn LlmProvider>,
    pub toolbox: Arc<Toolbox>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Conversation messages kept and sent with each request
    pub history_len: usize,
    /// Pause after a failed cycle before listening again
    pub error_backoff: Duration,
    pub not_understood: String,
    pub generic_error: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_len: crate::llm::context::DEFAULT_HISTORY_LEN,
            error_backoff: Duration::from_secs(1),
            not_understood: "Sorry, I didn't catch that. Please try again.".to_string(),
            generic_error: "Sorry, something went wrong. Please try again.".to_string(),
        }
    }
}
