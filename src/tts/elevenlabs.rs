use super::{SpeechDone, SpeechSynthesizer, TtsError};
use crate::audio::{AudioError, AudioSink, CpalConfig, CpalSink};
use reqwest::Client;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One second of 16kHz 16-bit mono
const WRITE_CHUNK_BYTES: usize = 32_000;

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub base_url: String,
    pub voice_id: String,
    pub model: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub request_timeout: Duration,
    /// Wait between retries while the playback buffer is full
    pub backpressure_wait: Duration,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(), // Rachel voice
            model: "eleven_multilingual_v2".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            use_speaker_boost: true,
            request_timeout: Duration::from_secs(30),
            backpressure_wait: Duration::from_millis(100),
        }
    }
}

/// Fetches raw 16kHz PCM from ElevenLabs and plays it on an [`AudioSink`]
pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: String,
    config: ElevenLabsConfig,
    sink: Mutex<Option<Arc<dyn AudioSink>>>,
    current: Mutex<Option<CancellationToken>>,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: String, config: ElevenLabsConfig) -> Result<Self, TtsError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
            sink: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    /// Play through `sink` instead of opening the default output device
    pub fn with_sink(self, sink: Arc<dyn AudioSink>) -> Self {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
        self
    }

    pub fn speech_url(&self) -> Result<Url, TtsError> {
        let mut url = Url::parse(&format!(
            "{}/text-to-speech/{}",
            self.config.base_url, self.config.voice_id
        ))
        .map_err(|e| TtsError::Config(e.to_string()))?;
        url.query_pairs_mut().append_pair("output_format", "pcm_16000");
        Ok(url)
    }

    fn current_sink(&self) -> Result<Arc<dyn AudioSink>, TtsError> {
        self.sink
            .lock()
            .map_err(|_| TtsError::Synthesis("sink lock poisoned".to_string()))?
            .clone()
            .ok_or(TtsError::NotInitialized)
    }

    /// Cancel whatever is in flight and optionally install a new token
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
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn initialize(&self) -> Result<(), TtsError> {
        if self.current_sink().is_ok() {
            return Ok(());
        }
        let sink = tokio::task::spawn_blocking(|| CpalSink::new(CpalConfig::default()))
            .await
            .map_err(|e| TtsError::Audio(AudioError::Device(e.to_string())))??;
        let mut slot = self
            .sink
            .lock()
            .map_err(|_| TtsError::Synthesis("sink lock poisoned".to_string()))?;
        *slot = Some(Arc::new(sink));
        log::debug!("TTS: Output sink opened");
        Ok(())
    }

    async fn speak(&self, text: &str, done: SpeechDone) -> Result<(), TtsError> {
        let sink = self.current_sink()?;
        sink.stop().await?;

        let token = CancellationToken::new();
        self.replace_current(Some(token.clone()));

        let utterance = Utterance {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            url: self.speech_url()?,
            payload: json!({
                "text": text,
                "model_id": self.config.model,
                "voice_settings": {
                    "stability": self.config.stability,
                    "similarity_boost": self.config.similarity_boost,
                    "style": self.config.style,
                    "use_speaker_boost": self.config.use_speaker_boost
                }
            }),
            sink,
            backpressure_wait: self.config.backpressure_wait,
        };

        tokio::spawn(async move {
            tokio::select! {
                result = utterance.play() => {
                    let _ = done.send(result);
                }
                _ = token.cancelled() => {
                    let _ = done.send(Err(TtsError::Cancelled));
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TtsError> {
        self.replace_current(None);
        if let Ok(sink) = self.current_sink() {
            sink.stop().await?;
        }
        Ok(())
    }
}

struct Utterance {
    client: Client,
    api_key: String,
    url: Url,
    payload: serde_json::Value,
    sink: Arc<dyn AudioSink>,
    backpressure_wait: Duration,
}

impl Utterance {
    async fn play(self) -> Result<(), TtsError> {
        let audio = self.fetch().await?;
        log::debug!("TTS: Received {} bytes of PCM", audio.len());

        // Chunks stay sample-aligned because the chunk size is even
        for chunk in audio.chunks(WRITE_CHUNK_BYTES) {
            loop {
                match self.sink.write(chunk).await {
                    Ok(()) => break,
                    Err(AudioError::BufferFull) => tokio::time::sleep(self.backpressure_wait).await,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        self.sink.drain().await?;
        Ok(())
    }

    async fn fetch(&self) -> Result<Vec<u8>, TtsError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/pcm")
            .json(&self.payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TtsError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
