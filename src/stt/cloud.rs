//! VAD-bounded capture followed by a Whisper transcription request.

use super::{RecognitionErrorKind, RecognitionEvent, Recognizer, SttError};
use crate::audio::{AudioFrame, AudioManager, MicrophoneLease, SAMPLE_RATE};
use crate::detection::{EnergyVad, VadConfig};
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TRANSCRIPTION_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";

#[derive(Debug, Clone)]
pub struct CloudRecognizerConfig {
    pub endpoint: String,
    pub model: String,
    pub language: Option<String>,
    pub temperature: f32,
    /// Utterances are cut off after this long
    pub max_utterance: Duration,
    /// Give up if nobody starts speaking within this window
    pub no_speech_timeout: Duration,
    pub vad: VadConfig,
    /// Leading frames used to learn the noise floor, when they are quiet
    pub calibration_frames: usize,
    pub request_timeout: Duration,
}

impl Default for CloudRecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: TRANSCRIPTION_URL.to_string(),
            model: "whisper-large-v3-turbo".to_string(),
            language: Some("en".to_string()),
            temperature: 0.0,
            max_utterance: Duration::from_secs(15),
            no_speech_timeout: Duration::from_secs(8),
            vad: VadConfig::default(),
            calibration_frames: 3,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Records one utterance, then posts it to an OpenAI-compatible
/// transcription endpoint.
pub struct CloudRecognizer {
    audio: AudioManager,
    client: Client,
    api_key: String,
    config: CloudRecognizerConfig,
    current: Mutex<Option<CancellationToken>>,
}

impl CloudRecognizer {
    pub fn new(
        audio: AudioManager,
        api_key: String,
        config: CloudRecognizerConfig,
    ) -> Result<Self, SttError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            audio,
            client,
            api_key,
            config,
            current: Mutex::new(None),
        })
    }

    fn replace_current(&self, token: Option<CancellationToken>) {
        let mut current = match self.current.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = std::mem::replace(&mut *current, token) {
            previous.cancel();
        }
    }
}

#[async_trait::async_trait]
impl Recognizer for CloudRecognizer {
    async fn start(
        &self,
        lease: MicrophoneLease,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SttError> {
        let stream = self.audio.open(lease).await?;
        let token = CancellationToken::new();
        self.replace_current(Some(token.clone()));

        let (tx, rx) = mpsc::channel(8);
        let session = Session {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            config: self.config.clone(),
            events: tx,
            cancel: token,
        };
        tokio::spawn(session.run(stream));
        Ok(rx)
    }

    async fn cancel(&self) {
        self.replace_current(None);
    }
}

enum Capture {
    Utterance(Vec<i16>),
    NoSpeech,
    StreamEnded,
    Cancelled,
}

struct Session {
    client: Client,
    api_key: String,
    config: CloudRecognizerConfig,
    events: mpsc::Sender<RecognitionEvent>,
    cancel: CancellationToken,
}

impl Session {
    async fn run(self, mut stream: crate::audio::AudioStream) {
        let _ = self.events.send(RecognitionEvent::Ready).await;
        let capture = self.capture(&mut stream).await;

        // Free the microphone before going to the network
        match stream.stop().await {
            Ok(lease) => drop(lease),
            Err(e) => log::warn!("Failed to stop capture cleanly: {}", e),
        }

        let event = match capture {
            Capture::Cancelled => return,
            Capture::NoSpeech => RecognitionEvent::Error(RecognitionErrorKind::SpeechTimeout),
            Capture::StreamEnded => RecognitionEvent::Error(RecognitionErrorKind::Audio),
            Capture::Utterance(samples) => {
                let request = self.transcribe(samples);
                tokio::select! {
                    result = request => match result {
                        Ok(text) if text.trim().is_empty() => {
                            RecognitionEvent::Error(RecognitionErrorKind::NoMatch)
                        }
                        Ok(text) => RecognitionEvent::Final(text.trim().to_string()),
                        Err(SttError::Request(e)) => {
                            log::error!("Transcription request failed: {}", e);
                            RecognitionEvent::Error(RecognitionErrorKind::Network)
                        }
                        Err(e) => {
                            log::error!("Transcription failed: {}", e);
                            RecognitionEvent::Error(RecognitionErrorKind::Other(e.to_string()))
                        }
                    },
                    _ = self.cancel.cancelled() => return,
                }
            }
        };
        let _ = self.events.send(event).await;
    }

    async fn capture(&self, stream: &mut crate::audio::AudioStream) -> Capture {
        let mut vad = EnergyVad::new(self.config.vad.clone());
        let mut leading: Vec<AudioFrame> = Vec::with_capacity(self.config.calibration_frames);
        let mut samples: Vec<i16> = Vec::new();
        let mut speech_seen = false;
        let max_samples =
            (self.config.max_utterance.as_secs_f64() * SAMPLE_RATE as f64) as usize;

        let no_speech = tokio::time::sleep(self.config.no_speech_timeout);
        tokio::pin!(no_speech);

        loop {
            let frame = tokio::select! {
                frame = stream.next() => match frame {
                    Some(frame) => frame,
                    None => return Capture::StreamEnded,
                },
                _ = &mut no_speech, if !speech_seen => {
                    log::info!("No speech within {:?}", self.config.no_speech_timeout);
                    return Capture::NoSpeech;
                }
                _ = self.cancel.cancelled() => return Capture::Cancelled,
            };

            if !vad.is_calibrated() && leading.len() < self.config.calibration_frames {
                leading.push(frame.clone());
                if leading.len() == self.config.calibration_frames {
                    let quiet = leading
                        .iter()
                        .all(|f| crate::detection::vad::frame_rms(&f.samples) < vad.threshold());
                    if quiet {
                        vad.calibrate(leading.iter().map(|f| f.samples.as_slice()));
                    }
                }
            }

            let activity = vad.process_frame(&frame.samples, frame.captured_at);
            if activity.speech_started {
                speech_seen = true;
            }
            samples.extend_from_slice(&frame.samples);

            if speech_seen && activity.speech_ended {
                log::debug!("Utterance complete: {} samples", samples.len());
                return Capture::Utterance(samples);
            }
            if samples.len() >= max_samples {
                if speech_seen {
                    log::info!("Utterance cut off at {:?}", self.config.max_utterance);
                    return Capture::Utterance(samples);
                }
                return Capture::NoSpeech;
            }
        }
    }

    async fn transcribe(&self, samples: Vec<i16>) -> Result<String, SttError> {
        let wav = encode_wav(&samples)?;
        log::debug!("STT: Uploading {} bytes of WAV", wav.len());

        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("temperature", self.config.temperature.to_string())
            .text("response_format", "json");
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SttError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SttError::ParseError(e.to_string()))?;
        Ok(body.text)
    }
}

/// 16-bit mono WAV at the capture rate
pub fn encode_wav(samples: &[i16]) -> Result<Vec<u8>, SttError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SttError::Encoding(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| SttError::Encoding(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| SttError::Encoding(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}
