//! Microphone ownership and PCM frame capture.
//!
//! The microphone is a single shared resource. Every phase that records
//! (wake-word listening, command capture) must hold a [`MicrophoneLease`],
//! and the lease only comes back once the capture thread has released the
//! device. A phase that wants the microphone simply waits on
//! [`Microphone::acquire`] instead of sleeping for a fixed settle delay.

pub mod capture;
pub mod scripted;
pub mod sink;

use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub use capture::{CaptureConfig, CpalAudioInput};
pub use scripted::ScriptedAudioInput;
pub use sink::{AudioSink, CpalConfig, CpalSink};

pub const SAMPLE_RATE: u32 = 16_000;
/// 100ms frames at 16kHz
pub const FRAME_SIZE: usize = 1600;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Playback error: {0}")]
    Playback(String),
    #[error("Resampling error: {0}")]
    Resampling(String),
    #[error("Playback buffer is full")]
    BufferFull,
    #[error("Microphone is held by another phase")]
    Busy,
    #[error("Microphone has been shut down")]
    Closed,
    #[error("Audio operation was cancelled")]
    Cancelled,
}

/// A fixed-size buffer of mono 16-bit PCM
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, captured_at: Instant) -> Self {
        Self {
            samples,
            captured_at,
        }
    }

    /// Duration of this frame at [`SAMPLE_RATE`]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / SAMPLE_RATE as f64)
    }
}

/// The one physical audio input, as a single-permit semaphore
#[derive(Debug, Clone)]
pub struct Microphone {
    permit: Arc<Semaphore>,
}

impl Microphone {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait until the microphone is free and take it
    pub async fn acquire(&self) -> Result<MicrophoneLease, AudioError> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|_| AudioError::Closed)?;
        log::debug!("🎙️ Microphone lease acquired");
        Ok(MicrophoneLease::new(permit))
    }

    /// Like [`acquire`](Self::acquire) but gives up when `cancel` fires
    pub async fn acquire_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MicrophoneLease, AudioError> {
        tokio::select! {
            lease = self.acquire() => lease,
            _ = cancel.cancelled() => Err(AudioError::Cancelled),
        }
    }

    /// Take the microphone only if nobody holds it
    pub fn try_acquire(&self) -> Result<MicrophoneLease, AudioError> {
        match Arc::clone(&self.permit).try_acquire_owned() {
            Ok(permit) => Ok(MicrophoneLease::new(permit)),
            Err(TryAcquireError::NoPermits) => Err(AudioError::Busy),
            Err(TryAcquireError::Closed) => Err(AudioError::Closed),
        }
    }

    pub fn is_available(&self) -> bool {
        self.permit.available_permits() > 0
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to record. Dropping it hands the microphone back.
#[derive(Debug)]
pub struct MicrophoneLease {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl MicrophoneLease {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: permit,
            acquired_at: Instant::now(),
        }
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Stops a running capture. `shutdown` blocks until the device is released.
pub trait CaptureControl: Send {
    fn shutdown(&mut self);
}

/// Push-style stream of captured frames. Owns the microphone lease for as
/// long as capture runs.
pub struct AudioStream {
    frames: ReceiverStream<AudioFrame>,
    control: Option<Box<dyn CaptureControl>>,
    lease: Option<MicrophoneLease>,
}

impl AudioStream {
    pub fn new(
        frames: mpsc::Receiver<AudioFrame>,
        control: Box<dyn CaptureControl>,
        lease: MicrophoneLease,
    ) -> Self {
        Self {
            frames: ReceiverStream::new(frames),
            control: Some(control),
            lease: Some(lease),
        }
    }

    /// Stop capture, wait for the device to be released and hand back the lease
    pub async fn stop(mut self) -> Result<MicrophoneLease, AudioError> {
        if let Some(mut control) = self.control.take() {
            tokio::task::spawn_blocking(move || control.shutdown())
                .await
                .map_err(|e| AudioError::Stream(format!("capture shutdown panicked: {}", e)))?;
        }
        log::debug!("🎙️ Capture stopped, device released");
        self.lease.take().ok_or(AudioError::Closed)
    }
}

impl Stream for AudioStream {
    type Item = AudioFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        let Some(mut control) = self.control.take() else {
            return;
        };
        // The lease goes back only after the device is released
        let lease = self.lease.take();
        let release = move || {
            control.shutdown();
            drop(lease);
        };
        // Joining the capture thread must not stall an async worker
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(release);
            }
            Err(_) => release(),
        }
    }
}

/// A source of microphone audio
#[async_trait::async_trait]
pub trait AudioInput: Send + Sync {
    /// Check that a capture device exists and can be configured
    async fn probe(&self) -> Result<(), AudioError>;

    /// Start capturing under the given lease
    async fn open(&self, lease: MicrophoneLease) -> Result<AudioStream, AudioError>;
}

/// Owns the audio input and the microphone lease pool
#[derive(Clone)]
pub struct AudioManager {
    input: Arc<dyn AudioInput>,
    microphone: Microphone,
}

impl AudioManager {
    pub fn new(input: Arc<dyn AudioInput>) -> Self {
        Self {
            input,
            microphone: Microphone::new(),
        }
    }

    pub fn microphone(&self) -> &Microphone {
        &self.microphone
    }

    pub async fn initialize(&self) -> Result<(), AudioError> {
        self.input.probe().await
    }

    /// Wait for the microphone and start recording
    pub async fn start_recording(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AudioStream, AudioError> {
        let lease = self.microphone.acquire_cancellable(cancel).await?;
        self.open(lease).await
    }

    /// Start recording with a lease the caller already holds
    pub async fn open(&self, lease: MicrophoneLease) -> Result<AudioStream, AudioError> {
        self.input.open(lease).await
    }
}
