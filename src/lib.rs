pub mod assistant;
pub mod audio;
pub mod config;
pub mod detection;
pub mod error;
pub mod llm;
pub mod stt;
pub mod tools;
pub mod tts;

pub use assistant::{AssistantComponents, AssistantOrchestrator, AssistantState, OrchestratorConfig};
pub use error::{AssistantError, Result};
