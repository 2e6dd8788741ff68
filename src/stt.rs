//! Speech recognition with retry, a watchdog and partial-transcript fallback.
//!
//! Recognizers report through an event channel, the way platform
//! recognizers report through callbacks. [`SpeechToTextManager`] turns that
//! into a single awaited transcript.

pub mod cloud;

pub use cloud::{CloudRecognizer, CloudRecognizerConfig};

use crate::audio::{AudioError, Microphone, MicrophoneLease};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum SttError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Audio encoding error: {0}")]
    Encoding(String),
    #[error("Response parsing error: {0}")]
    ParseError(String),
    #[error("Recognizer error: {0}")]
    Recognizer(String),
    #[error("Recognition was cancelled")]
    Cancelled,
}

/// Why a recognition attempt produced no final result
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum RecognitionErrorKind {
    /// Recognizer or microphone still in use by someone else
    Busy,
    /// Capture failed
    Audio,
    Network,
    /// Speech was heard but nothing was recognized
    NoMatch,
    /// Nobody spoke
    SpeechTimeout,
    Other(String),
}

impl RecognitionErrorKind {
    /// Worth another attempt after a short pause
    pub fn is_transient(&self) -> bool {
        matches!(self, RecognitionErrorKind::Busy | RecognitionErrorKind::Audio)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Recording has started
    Ready,
    Partial(String),
    Final(String),
    Error(RecognitionErrorKind),
}

/// A recognizer that records under the given lease and reports events.
/// The lease must be dropped once recording stops.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    async fn start(
        &self,
        lease: MicrophoneLease,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SttError>;

    /// Abandon the current recognition, if any
    async fn cancel(&self) {}
}

#[async_trait::async_trait]
pub trait SpeechToText: Send + Sync {
    /// Capture one utterance and return its transcript, or `None` if nothing was understood
    async fn recognize(&self, cancel: &CancellationToken) -> Result<Option<String>, SttError>;
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Attempts for transient failures, including the first
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    /// Gives up on a recognizer that never reports a final result
    pub watchdog: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            watchdog: Duration::from_secs(12),
        }
    }
}

enum AttemptOutcome {
    Final(String),
    Transient(RecognitionErrorKind),
    NoResult,
    Cancelled,
}

pub struct SpeechToTextManager {
    recognizer: Arc<dyn Recognizer>,
    microphone: Microphone,
    config: SttConfig,
}

impl SpeechToTextManager {
    pub fn new(recognizer: Arc<dyn Recognizer>, microphone: Microphone, config: SttConfig) -> Self {
        Self {
            recognizer,
            microphone,
            config,
        }
    }

    async fn run_attempt(
        &self,
        events: &mut mpsc::Receiver<RecognitionEvent>,
        last_partial: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let watchdog = tokio::time::sleep(self.config.watchdog);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(RecognitionEvent::Ready) => log::debug!("🎙️ Recognizer ready"),
                    Some(RecognitionEvent::Partial(text)) => {
                        log::debug!("📝 Partial: {}", text);
                        if !text.trim().is_empty() {
                            *last_partial = Some(text);
                        }
                    }
                    Some(RecognitionEvent::Final(text)) => {
                        if text.trim().is_empty() {
                            return AttemptOutcome::NoResult;
                        }
                        return AttemptOutcome::Final(text);
                    }
                    Some(RecognitionEvent::Error(kind)) if kind.is_transient() => {
                        return AttemptOutcome::Transient(kind);
                    }
                    Some(RecognitionEvent::Error(kind)) => {
                        log::info!("Recognition ended without result: {}", kind);
                        return AttemptOutcome::NoResult;
                    }
                    None => {
                        log::warn!("Recognizer closed its event channel");
                        return AttemptOutcome::NoResult;
                    }
                },
                _ = &mut watchdog => {
                    log::warn!("⏰ Recognition watchdog fired after {:?}", self.config.watchdog);
                    self.recognizer.cancel().await;
                    return AttemptOutcome::NoResult;
                }
                _ = cancel.cancelled() => {
                    self.recognizer.cancel().await;
                    return AttemptOutcome::Cancelled;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl SpeechToText for SpeechToTextManager {
    async fn recognize(&self, cancel: &CancellationToken) -> Result<Option<String>, SttError> {
        let mut last_partial: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            let lease = match self.microphone.acquire_cancellable(cancel).await {
                Ok(lease) => lease,
                Err(AudioError::Cancelled) => return Err(SttError::Cancelled),
                Err(e) => return Err(e.into()),
            };

            let outcome = match self.recognizer.start(lease).await {
                Ok(mut events) => self.run_attempt(&mut events, &mut last_partial, cancel).await,
                Err(SttError::Audio(e)) => {
                    log::warn!("Recognizer could not open the microphone: {}", e);
                    AttemptOutcome::Transient(RecognitionErrorKind::Audio)
                }
                Err(e) => return Err(e),
            };

            match outcome {
                AttemptOutcome::Final(text) => {
                    log::info!("📝 Transcript: {}", text);
                    return Ok(Some(text));
                }
                AttemptOutcome::Cancelled => return Err(SttError::Cancelled),
                AttemptOutcome::NoResult => break,
                AttemptOutcome::Transient(kind) => {
                    if attempt == self.config.max_attempts {
                        log::warn!("Giving up after {} attempts ({})", attempt, kind);
                        break;
                    }
                    log::warn!(
                        "Transient recognition error ({}), retry {} of {}",
                        kind,
                        attempt + 1,
                        self.config.max_attempts
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = cancel.cancelled() => return Err(SttError::Cancelled),
                    }
                }
            }
        }

        if let Some(partial) = &last_partial {
            log::info!("📝 Using last partial transcript: {}", partial);
        }
        Ok(last_partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays one scripted list of events per `start` call
    struct ScriptedRecognizer {
        attempts: Mutex<VecDeque<Vec<RecognitionEvent>>>,
        starts: Mutex<u32>,
        hold_open: bool,
    }

    impl ScriptedRecognizer {
        fn new(attempts: Vec<Vec<RecognitionEvent>>) -> Self {
            Self {
                attempts: Mutex::new(attempts.into()),
                starts: Mutex::new(0),
                hold_open: false,
            }
        }

        fn stalling(events: Vec<RecognitionEvent>) -> Self {
            Self {
                hold_open: true,
                ..Self::new(vec![events])
            }
        }

        fn starts(&self) -> u32 {
            *self.starts.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn start(
            &self,
            lease: MicrophoneLease,
        ) -> Result<mpsc::Receiver<RecognitionEvent>, SttError> {
            *self.starts.lock().unwrap() += 1;
            let events = self.attempts.lock().unwrap().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(16);
            let hold_open = self.hold_open;
            tokio::spawn(async move {
                let _lease = lease;
                for event in events {
                    let _ = tx.send(event).await;
                }
                if hold_open {
                    tx.closed().await;
                }
            });
            Ok(rx)
        }
    }

    fn manager(recognizer: Arc<ScriptedRecognizer>) -> SpeechToTextManager {
        SpeechToTextManager::new(
            recognizer,
            Microphone::new(),
            SttConfig {
                max_attempts: 3,
                retry_backoff: Duration::from_millis(5),
                watchdog: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_final_transcript() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![vec![
            RecognitionEvent::Ready,
            RecognitionEvent::Partial("turn on".into()),
            RecognitionEvent::Final("turn on the flashlight".into()),
        ]]));
        let result = manager(recognizer).recognize(&CancellationToken::new()).await;
        assert_eq!(result.unwrap().as_deref(), Some("turn on the flashlight"));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            vec![RecognitionEvent::Error(RecognitionErrorKind::Busy)],
            vec![RecognitionEvent::Error(RecognitionErrorKind::Audio)],
            vec![RecognitionEvent::Final("call mom".into())],
        ]));
        let result = manager(recognizer.clone())
            .recognize(&CancellationToken::new())
            .await;
        assert_eq!(result.unwrap().as_deref(), Some("call mom"));
        assert_eq!(recognizer.starts(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let busy = vec![RecognitionEvent::Error(RecognitionErrorKind::Busy)];
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            busy.clone(),
            busy.clone(),
            busy.clone(),
            busy,
        ]));
        let result = manager(recognizer.clone())
            .recognize(&CancellationToken::new())
            .await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(recognizer.starts(), 3);
    }

    #[tokio::test]
    async fn test_no_match_falls_back_to_partial() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![vec![
            RecognitionEvent::Partial("what time".into()),
            RecognitionEvent::Error(RecognitionErrorKind::NoMatch),
        ]]));
        let result = manager(recognizer).recognize(&CancellationToken::new()).await;
        assert_eq!(result.unwrap().as_deref(), Some("what time"));
    }

    #[tokio::test]
    async fn test_timeout_without_partial_is_empty() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![vec![
            RecognitionEvent::Error(RecognitionErrorKind::SpeechTimeout),
        ]]));
        let result = manager(recognizer).recognize(&CancellationToken::new()).await;
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watchdog_recovers_partial() {
        let recognizer = Arc::new(ScriptedRecognizer::stalling(vec![
            RecognitionEvent::Ready,
            RecognitionEvent::Partial("turn off the".into()),
        ]));
        let result = manager(recognizer).recognize(&CancellationToken::new()).await;
        assert_eq!(result.unwrap().as_deref(), Some("turn off the"));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let recognizer = Arc::new(ScriptedRecognizer::stalling(vec![RecognitionEvent::Ready]));
        let cancel = CancellationToken::new();
        let stt = manager(recognizer);

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };

        let result = stt.recognize(&cancel).await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(SttError::Cancelled)));
    }

    #[tokio::test]
    async fn test_blank_final_is_no_result() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![vec![RecognitionEvent::Final(
            "   ".into(),
        )]]));
        let result = manager(recognizer).recognize(&CancellationToken::new()).await;
        assert_eq!(result.unwrap(), None);
    }
}
