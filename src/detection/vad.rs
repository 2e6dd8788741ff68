//! RMS-threshold voice activity detection with hysteresis.
//!
//! Decides where an utterance ends: speech must be followed by 1.5s of
//! silence, and bursts shorter than 300ms are dropped as noise.

use std::time::{Duration, Instant};
use strum::Display;

#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Threshold used before calibration
    pub default_threshold: f64,
    /// Calibrated threshold = noise floor * this
    pub noise_multiplier: f64,
    /// Silence needed to close an utterance
    pub silence_timeout: Duration,
    /// Shortest speech reported as an utterance
    pub min_speech: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            default_threshold: 500.0,
            noise_multiplier: 3.0,
            silence_timeout: Duration::from_millis(1500),
            min_speech: Duration::from_millis(300),
        }
    }
}

impl VadConfig {
    /// Map a 0..1 sensitivity onto the noise multiplier. 0.5 keeps the default 3x.
    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        let s = sensitivity.clamp(0.0, 1.0) as f64;
        self.noise_multiplier = 4.5 - 3.0 * s;
        self.default_threshold = 500.0 * self.noise_multiplier / 3.0;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum VadState {
    Silent,
    Speaking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceActivityResult {
    pub is_voice: bool,
    pub rms: f64,
    /// This frame opened an utterance
    pub speech_started: bool,
    /// This frame closed an utterance long enough to keep
    pub speech_ended: bool,
    pub state: VadState,
    pub timestamp: Instant,
}

/// Root mean square of the samples. Empty frames are silent.
pub fn frame_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

pub struct EnergyVad {
    config: VadConfig,
    noise_floor: Option<f64>,
    state: VadState,
    speech_start: Option<Instant>,
    last_voice: Option<Instant>,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            noise_floor: None,
            state: VadState::Silent,
            speech_start: None,
            last_voice: None,
        }
    }

    /// Learn the noise floor from frames known to contain no speech
    pub fn calibrate<'a, I>(&mut self, silence_frames: I)
    where
        I: IntoIterator<Item = &'a [i16]>,
    {
        let levels: Vec<f64> = silence_frames.into_iter().map(frame_rms).collect();
        if levels.is_empty() {
            log::warn!("VAD calibration skipped: no frames");
            return;
        }
        let floor = levels.iter().sum::<f64>() / levels.len() as f64;
        self.noise_floor = Some(floor);
        log::info!(
            "🎚️ VAD calibrated: noise floor {:.1}, threshold {:.1}",
            floor,
            self.threshold()
        );
    }

    pub fn is_calibrated(&self) -> bool {
        self.noise_floor.is_some()
    }

    pub fn threshold(&self) -> f64 {
        match self.noise_floor {
            Some(floor) if floor > 0.0 => floor * self.config.noise_multiplier,
            _ => self.config.default_threshold,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn process_frame(&mut self, samples: &[i16], now: Instant) -> VoiceActivityResult {
        let rms = frame_rms(samples);
        let is_voice = rms > self.threshold();
        let mut speech_started = false;
        let mut speech_ended = false;

        match self.state {
            VadState::Silent => {
                if is_voice {
                    self.state = VadState::Speaking;
                    self.speech_start = Some(now);
                    self.last_voice = Some(now);
                    speech_started = true;
                    log::debug!("🗣️ Speech started (rms {:.1})", rms);
                }
            }
            VadState::Speaking => {
                if is_voice {
                    self.last_voice = Some(now);
                } else if let (Some(start), Some(last)) = (self.speech_start, self.last_voice) {
                    if now.saturating_duration_since(last) >= self.config.silence_timeout {
                        let spoken = last.saturating_duration_since(start);
                        self.state = VadState::Silent;
                        self.speech_start = None;
                        self.last_voice = None;
                        if spoken >= self.config.min_speech {
                            speech_ended = true;
                            log::debug!("🤫 Speech ended after {:?}", spoken);
                        } else {
                            log::debug!("Discarding {:?} burst as noise", spoken);
                        }
                    }
                }
            }
        }

        VoiceActivityResult {
            is_voice,
            rms,
            speech_started,
            speech_ended,
            state: self.state,
            timestamp: now,
        }
    }

    pub fn reset(&mut self) {
        self.state = VadState::Silent;
        self.speech_start = None;
        self.last_voice = None;
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}
