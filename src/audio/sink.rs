use super::{AudioError, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Core trait for audio output handling
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Queue audio for playback. The data is 16-bit little-endian PCM at 16kHz mono.
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError>;

    /// Wait until everything queued so far has been played
    async fn drain(&self) -> Result<(), AudioError>;

    /// Stop audio playback and clear any buffered data
    async fn stop(&self) -> Result<(), AudioError>;
}

pub struct CpalConfig {
    /// Buffer size in milliseconds
    pub buffer_size_ms: u32,
    /// How often `drain` checks the queue
    pub drain_poll: Duration,
}

impl Default for CpalConfig {
    fn default() -> Self {
        Self {
            buffer_size_ms: 45000,
            drain_poll: Duration::from_millis(20),
        }
    }
}

/// Plays PCM on the default output device. The output stream lives on its
/// own thread; writes go straight into a shared sample queue.
pub struct CpalSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    max_samples: usize,
    config: CpalConfig,
    shutdown_tx: Sender<()>,
    is_stopped: AtomicBool,
    audio_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalSink {
    pub fn new(config: CpalConfig) -> Result<Self, AudioError> {
        log::debug!("AudioSink: Creating new CpalSink");
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("No output device found".to_string()))?;

        // Convert our samples to whatever the device wants
        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        log::debug!("AudioSink: Using output config: {:?}", supported_config);

        let output_sample_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let callback_queue = Arc::clone(&queue);
        let (shutdown_tx, shutdown_rx) = channel::<()>();
        let (ready_tx, ready_rx) = channel::<Result<(), AudioError>>();

        let audio_thread = thread::spawn(move || {
            let step = SAMPLE_RATE as f32 / output_sample_rate as f32;
            let mut position = 0.0f32;

            let stream = device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = match callback_queue.lock() {
                        Ok(queue) => queue,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    for frame in data.chunks_mut(output_channels) {
                        // Linear interpolation between neighbouring input samples
                        let idx = position.floor() as usize;
                        let fract = position.fract();
                        let sample = match (queue.get(idx), queue.get(idx + 1)) {
                            (Some(a), Some(b)) => a * (1.0 - fract) + b * fract,
                            (Some(a), None) => *a,
                            _ => 0.0,
                        };
                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }
                        position += step;
                    }
                    let consumed = (position.floor() as usize).min(queue.len());
                    queue.drain(..consumed);
                    position -= consumed as f32;
                    if queue.is_empty() {
                        position = 0.0;
                    }
                },
                |err| log::error!("AudioSink: Stream error: {}", err),
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::Playback(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            let _ = shutdown_rx.recv();
            drop(stream);
            log::debug!("AudioSink: Audio thread exiting");
        });

        ready_rx
            .recv()
            .map_err(|_| AudioError::Device("audio thread exited early".to_string()))??;

        log::debug!("AudioSink: Successfully created CpalSink");
        Ok(Self {
            queue,
            max_samples: (config.buffer_size_ms as usize * SAMPLE_RATE as usize) / 1000,
            config,
            shutdown_tx,
            is_stopped: AtomicBool::new(false),
            audio_thread: Mutex::new(Some(audio_thread)),
        })
    }

    fn queued_samples(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Ok(mut handle) = self.audio_thread.lock() {
            if let Some(thread) = handle.take() {
                if let Err(e) = thread.join() {
                    log::error!("Failed to join audio thread: {:?}", e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AudioSink for CpalSink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
        self.is_stopped.store(false, Ordering::Release);

        let mut queue = self
            .queue
            .lock()
            .map_err(|_| AudioError::Playback("sample queue poisoned".to_string()))?;

        let incoming = audio_data.len() / 2;
        if queue.len() + incoming > self.max_samples {
            log::debug!("AudioSink: Buffer full");
            return Err(AudioError::BufferFull);
        }

        for chunk in audio_data.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            queue.push_back(sample as f32 / i16::MAX as f32);
        }
        log::debug!("AudioSink: Queued {} samples ({} total)", incoming, queue.len());
        Ok(())
    }

    async fn drain(&self) -> Result<(), AudioError> {
        while self.queued_samples() > 0 {
            if self.is_stopped.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::time::sleep(self.config.drain_poll).await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), AudioError> {
        log::debug!("AudioSink: Stopping sink");
        self.is_stopped.store(true, Ordering::Release);
        self.queue
            .lock()
            .map_err(|_| AudioError::Playback("sample queue poisoned".to_string()))?
            .clear();
        Ok(())
    }
}

#[cfg(all(test, feature = "test-audio"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cpal_sink_write_and_drain() -> Result<(), AudioError> {
        let sink = CpalSink::new(CpalConfig::default())?;

        // 200ms of 440Hz sine
        let mut samples = Vec::new();
        for i in 0..3200 {
            let t = i as f32 / SAMPLE_RATE as f32;
            let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            samples.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes());
        }

        sink.write(&samples).await?;
        tokio::time::timeout(Duration::from_secs(2), sink.drain())
            .await
            .expect("playback should drain")?;
        Ok(())
    }
}
