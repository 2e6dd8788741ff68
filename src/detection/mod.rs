pub mod vad;
pub mod wakeword;

pub use vad::{EnergyVad, VadConfig, VadState, VoiceActivityResult};
pub use wakeword::{EnergyWakeWordDetector, WakeWordConfig, WakeWordResult};

use crate::audio::{AudioError, AudioManager};
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Records until the detector fires, then stops recording so the
/// microphone is free for the next phase.
pub struct WakeWordListener {
    audio: AudioManager,
    detector: Mutex<EnergyWakeWordDetector>,
}

impl WakeWordListener {
    pub fn new(audio: AudioManager, config: WakeWordConfig) -> Self {
        Self {
            audio,
            detector: Mutex::new(EnergyWakeWordDetector::new(config)),
        }
    }

    pub async fn initialize(&self) -> Result<(), AudioError> {
        self.audio.initialize().await
    }

    /// Listen until a wake event or cancellation. The microphone is released
    /// before this returns, whatever the outcome.
    pub async fn listen(&self, cancel: &CancellationToken) -> Result<WakeWordResult, AudioError> {
        let mut stream = self.audio.start_recording(cancel).await?;
        let mut detector = self.detector.lock().await;
        log::info!("👂 Listening for wake word '{}'", detector.config().keyword);

        let outcome = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(frame) => {
                        if let Some(result) = detector.process_frame(&frame.samples, frame.captured_at) {
                            break Ok(result);
                        }
                    }
                    None => break Err(AudioError::Stream("microphone stream ended".to_string())),
                },
                _ = cancel.cancelled() => break Err(AudioError::Cancelled),
            }
        };

        drop(detector);
        let lease = stream.stop().await?;
        drop(lease);
        outcome
    }

    /// Clear detector history and timers
    pub async fn reset(&self) {
        self.detector.lock().await.reset();
    }
}
