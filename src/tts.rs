//! Text-to-speech: a callback-style synthesizer bridged to a single awaited call.

pub mod elevenlabs;

pub use elevenlabs::{ElevenLabsConfig, ElevenLabsSynthesizer};

use crate::audio::AudioError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Synthesis error: {0}")]
    Synthesis(String),
    #[error("Text-to-speech is not initialized")]
    NotInitialized,
    #[error("Utterance did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Speech was cancelled")]
    Cancelled,
}

/// Completion callback for one utterance
pub type SpeechDone = oneshot::Sender<Result<(), TtsError>>;

/// A speech engine that reports completion through a callback
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn initialize(&self) -> Result<(), TtsError>;

    /// Flush anything still playing and start speaking `text`.
    /// `done` is completed when the utterance has been played.
    async fn speak(&self, text: &str, done: SpeechDone) -> Result<(), TtsError>;

    async fn stop(&self) -> Result<(), TtsError>;
}

#[async_trait::async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn initialize(&self) -> Result<(), TtsError>;

    /// Speak `text` and return once it has been played
    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), TtsError>;

    async fn stop(&self) -> Result<(), TtsError>;
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Longest an utterance may take, synthesis included
    pub utterance_timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            utterance_timeout: Duration::from_secs(60),
        }
    }
}

pub struct TextToSpeechManager {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: TtsConfig,
    initialized: AtomicBool,
}

impl TextToSpeechManager {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, config: TtsConfig) -> Self {
        Self {
            synthesizer,
            config,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl TextToSpeech for TextToSpeechManager {
    async fn initialize(&self) -> Result<(), TtsError> {
        if self.is_initialized() {
            return Ok(());
        }
        self.synthesizer.initialize().await?;
        self.initialized.store(true, Ordering::Release);
        log::info!("🔊 Text-to-speech ready");
        Ok(())
    }

    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), TtsError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_initialized() {
            return Err(TtsError::NotInitialized);
        }

        log::info!("🗣️ Speaking: {}", text);
        let (done_tx, done_rx) = oneshot::channel();
        self.synthesizer.speak(text, done_tx).await?;

        tokio::select! {
            result = done_rx => match result {
                Ok(result) => result,
                Err(_) => Err(TtsError::Synthesis("synthesizer dropped the utterance".to_string())),
            },
            _ = tokio::time::sleep(self.config.utterance_timeout) => {
                log::warn!("Utterance timed out after {:?}", self.config.utterance_timeout);
                self.synthesizer.stop().await?;
                Err(TtsError::Timeout(self.config.utterance_timeout))
            }
            _ = cancel.cancelled() => {
                self.synthesizer.stop().await?;
                Err(TtsError::Cancelled)
            }
        }
    }

    async fn stop(&self) -> Result<(), TtsError> {
        self.synthesizer.stop().await
    }
}
