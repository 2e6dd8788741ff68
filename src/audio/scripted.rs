//! In-memory audio input that replays prepared frames, for tests and demos.

use super::{AudioError, AudioFrame, AudioInput, AudioStream, CaptureControl, MicrophoneLease};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Replays one prepared session of frames per `open`. Once its sessions are
/// used up, further streams stay open but silent.
pub struct ScriptedAudioInput {
    sessions: Mutex<VecDeque<Vec<Vec<i16>>>>,
    frame_interval: Duration,
    probe_error: Option<String>,
    opens: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl ScriptedAudioInput {
    /// A single session of frames
    pub fn new(frames: Vec<Vec<i16>>) -> Self {
        Self::with_sessions(vec![frames])
    }

    pub fn with_sessions(sessions: Vec<Vec<Vec<i16>>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            frame_interval: Duration::ZERO,
            probe_error: None,
            opens: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An input with nothing to say
    pub fn silent() -> Self {
        Self::with_sessions(Vec::new())
    }

    /// Pause between frames, to give timing-sensitive consumers real gaps
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make `probe` fail, as a missing device would
    pub fn with_probe_error(mut self, message: impl Into<String>) -> Self {
        self.probe_error = Some(message.into());
        self
    }

    /// How many times capture was started
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of captures currently running
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct ScriptedCapture {
    stop: CancellationToken,
    active: Arc<AtomicUsize>,
    stopped: bool,
}

impl CaptureControl for ScriptedCapture {
    fn shutdown(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stop.cancel();
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl AudioInput for ScriptedAudioInput {
    async fn probe(&self) -> Result<(), AudioError> {
        match &self.probe_error {
            Some(message) => Err(AudioError::Device(message.clone())),
            None => Ok(()),
        }
    }

    async fn open(&self, lease: MicrophoneLease) -> Result<AudioStream, AudioError> {
        self.probe().await?;

        let frames = self
            .sessions
            .lock()
            .map_err(|_| AudioError::Stream("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or_default();

        self.opens.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(32);
        let stop = CancellationToken::new();
        let task_stop = stop.clone();
        let interval = self.frame_interval;

        tokio::spawn(async move {
            for samples in frames {
                if !interval.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = task_stop.cancelled() => return,
                    }
                }
                let frame = AudioFrame::new(samples, Instant::now());
                tokio::select! {
                    sent = tx.send(frame) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = task_stop.cancelled() => return,
                }
            }
            // Hold the sender so the stream idles like a quiet microphone
            task_stop.cancelled().await;
        });

        Ok(AudioStream::new(
            rx,
            Box::new(ScriptedCapture {
                stop,
                active: Arc::clone(&self.active),
                stopped: false,
            }),
            lease,
        ))
    }
}
