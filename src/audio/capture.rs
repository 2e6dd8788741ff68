use super::{
    AudioError, AudioFrame, AudioInput, AudioStream, CaptureControl, MicrophoneLease, FRAME_SIZE,
    SAMPLE_RATE,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Device samples fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Turns one channel of device samples into 16kHz frames of `frame_size`
/// samples, resampling through a sinc filter when the device runs at
/// another rate.
pub(crate) struct FrameAssembler {
    resampler: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
    frame: Vec<i16>,
    frame_size: usize,
}

impl FrameAssembler {
    pub(crate) fn new(input_rate: u32, frame_size: usize) -> Result<Self, AudioError> {
        let resampler = if input_rate == SAMPLE_RATE {
            None
        } else {
            let ratio = SAMPLE_RATE as f64 / input_rate as f64;
            let params = SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
                .map_err(|e| AudioError::Resampling(e.to_string()))?;
            log::info!(
                "🔄 Created resampler: {}Hz → 16kHz (ratio: {:.3})",
                input_rate,
                ratio
            );
            Some(resampler)
        };

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
            frame: Vec::with_capacity(frame_size),
            frame_size,
        })
    }

    /// Take device samples in `[-1.0, 1.0]` and return every frame they complete
    pub(crate) fn push(&mut self, samples: impl IntoIterator<Item = f32>) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        match self.resampler.as_mut() {
            None => {
                for sample in samples {
                    Self::append(&mut self.frame, self.frame_size, sample, &mut frames);
                }
            }
            Some(resampler) => {
                self.pending.extend(samples);
                while self.pending.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = self.pending.drain(..RESAMPLE_CHUNK).collect();
                    let output = match resampler.process(&[chunk], None) {
                        Ok(mut channels) => channels.swap_remove(0),
                        Err(e) => {
                            log::error!("Resampling error: {}", e);
                            continue;
                        }
                    };
                    for sample in output {
                        Self::append(&mut self.frame, self.frame_size, sample, &mut frames);
                    }
                }
            }
        }
        frames
    }

    fn append(frame: &mut Vec<i16>, frame_size: usize, sample: f32, frames: &mut Vec<Vec<i16>>) {
        frame.push((sample.clamp(-1.0, 1.0) * 32768.0).clamp(-32768.0, 32767.0) as i16);
        if frame.len() >= frame_size {
            frames.push(std::mem::replace(frame, Vec::with_capacity(frame_size)));
        }
    }
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device name to capture from (None = default device)
    pub device_id: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u32,
    /// Samples per emitted frame
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            channel: 0,
            frame_size: FRAME_SIZE,
        }
    }
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
}

/// Microphone capture through CPAL. Each `open` runs the device stream on its
/// own thread because CPAL streams are not `Send`.
pub struct CpalAudioInput {
    config: CaptureConfig,
}

impl CpalAudioInput {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn find_device(device_id: Option<&str>) -> Result<Device, AudioError> {
        let host = cpal::default_host();
        match device_id {
            Some(id) => host
                .input_devices()
                .map_err(|e| AudioError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == id).unwrap_or(false))
                .ok_or_else(|| AudioError::Device(format!("Device not found: {}", id))),
            None => host
                .default_input_device()
                .ok_or_else(|| AudioError::Device("No default input device found".into())),
        }
    }

    /// Pick a config at 16kHz if the device has one, otherwise its default
    fn select_config(device: &Device) -> Result<cpal::SupportedStreamConfig, AudioError> {
        let supported: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| AudioError::Config(e.to_string()))?
            .collect();

        for config in &supported {
            if config.min_sample_rate().0 <= SAMPLE_RATE && config.max_sample_rate().0 >= SAMPLE_RATE
            {
                log::info!(
                    "Found config with native 16kHz support: {:?}",
                    config.sample_format()
                );
                return Ok(config.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));
            }
        }

        let fallback = device
            .default_input_config()
            .map_err(|e| AudioError::Config(e.to_string()))?;
        log::info!(
            "Using default config with resampling: {:?} @ {}Hz",
            fallback.sample_format(),
            fallback.sample_rate().0
        );
        Ok(fallback)
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        tx: mpsc::Sender<AudioFrame>,
        channel: u32,
        frame_size: usize,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: Sample + SizedSample + Send + Sync + 'static,
        f32: FromSample<T>,
    {
        let channels = config.channels as usize;
        let mut assembler = FrameAssembler::new(config.sample_rate.0, frame_size)?;

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples = data
                        .chunks(channels)
                        .filter_map(|frame| frame.get(channel as usize))
                        .map(|s| f32::from_sample(*s));
                    for samples in assembler.push(samples) {
                        if tx.try_send(AudioFrame::new(samples, Instant::now())).is_err() {
                            log::warn!("Capture consumer is behind, dropping a frame");
                        }
                    }
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))
    }

    fn start_stream(
        config: &CaptureConfig,
        tx: mpsc::Sender<AudioFrame>,
    ) -> Result<cpal::Stream, AudioError> {
        let device = Self::find_device(config.device_id.as_deref())?;
        let supported = Self::select_config(&device)?;

        if config.channel >= u32::from(supported.channels()) {
            return Err(AudioError::Config(format!(
                "Selected channel {} is not available (device has {} channels)",
                config.channel,
                supported.channels()
            )));
        }

        let stream_config = supported.config();
        log::info!(
            "Audio capture configured: {} channels @ {}Hz (format: {:?})",
            stream_config.channels,
            stream_config.sample_rate.0,
            supported.sample_format()
        );

        let stream = match supported.sample_format() {
            SampleFormat::I16 => Self::build_stream::<i16>(
                &device,
                &stream_config,
                tx,
                config.channel,
                config.frame_size,
            )?,
            SampleFormat::U16 => Self::build_stream::<u16>(
                &device,
                &stream_config,
                tx,
                config.channel,
                config.frame_size,
            )?,
            SampleFormat::F32 => Self::build_stream::<f32>(
                &device,
                &stream_config,
                tx,
                config.channel,
                config.frame_size,
            )?,
            _ => return Err(AudioError::Config("Unsupported sample format".into())),
        };

        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        Ok(stream)
    }

    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, AudioError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut result = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                let channel_count = device
                    .default_input_config()
                    .map(|c| u32::from(c.channels()))
                    .unwrap_or(0);
                result.push(AudioDeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    channel_count,
                });
            }
        }

        Ok(result)
    }
}

/// Handle to the capture thread
struct CpalCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureControl for CpalCapture {
    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Failed to join capture thread: {:?}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl AudioInput for CpalAudioInput {
    async fn probe(&self) -> Result<(), AudioError> {
        let device_id = self.config.device_id.clone();
        tokio::task::spawn_blocking(move || {
            let device = Self::find_device(device_id.as_deref())?;
            Self::select_config(&device).map(|_| ())
        })
        .await
        .map_err(|e| AudioError::Device(e.to_string()))?
    }

    async fn open(&self, lease: MicrophoneLease) -> Result<AudioStream, AudioError> {
        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = thread::spawn(move || {
            let stream = match Self::start_stream(&config, frame_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Park until asked to stop (or the handle is gone)
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("Capture thread exiting");
        });

        let mut control = CpalCapture {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        };

        match ready_rx.await {
            Ok(Ok(())) => {
                log::info!("🎤 Microphone capture started");
                Ok(AudioStream::new(frame_rx, Box::new(control), lease))
            }
            Ok(Err(e)) => {
                control.shutdown();
                Err(e)
            }
            Err(_) => {
                control.shutdown();
                Err(AudioError::Stream("capture thread exited early".into()))
            }
        }
    }
}
