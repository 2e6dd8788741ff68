//! Energy-spike wake detection.
//!
//! A frame wakes the assistant when its energy rises well above a rolling
//! baseline of recent background energy. The baseline is the mean of the
//! quietest 70% of the last 50 frames, so bursts of speech barely move it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Full-scale energy of a saturated 16-bit frame
const MAX_ENERGY: f64 = (i16::MAX as f64) * (i16::MAX as f64);

#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Label reported on detection
    pub keyword: String,
    /// Confidence reported on detection
    pub confidence: f32,
    /// Number of recent frame energies kept for the baseline
    pub history_len: usize,
    /// Share of the quietest history used for the baseline
    pub baseline_fraction: f64,
    /// Energy below `baseline * silence_multiplier` counts as silence
    pub silence_multiplier: f64,
    /// Energy above `baseline * spike_multiplier` counts as speech
    pub spike_multiplier: f64,
    /// Absolute energy a frame must exceed regardless of baseline
    pub energy_floor: f64,
    /// Highest speech threshold, so saturated frames always qualify
    pub threshold_ceiling: f64,
    /// Minimum time between detections
    pub cooldown: Duration,
    /// Continuous silence required before re-arming
    pub min_silence: Duration,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            keyword: "omar".to_string(),
            confidence: 0.8,
            history_len: 50,
            baseline_fraction: 0.7,
            silence_multiplier: 1.5,
            spike_multiplier: 3.0,
            energy_floor: 1.0e6, // RMS amplitude ~1000
            threshold_ceiling: MAX_ENERGY * 0.25,
            cooldown: Duration::from_secs(3),
            min_silence: Duration::from_secs(1),
        }
    }
}

impl WakeWordConfig {
    /// Map a 0..1 sensitivity onto the spike multiplier. 0.5 keeps the default 3x.
    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        let s = sensitivity.clamp(0.0, 1.0) as f64;
        self.spike_multiplier = 4.5 - 3.0 * s;
        self
    }
}

/// Emitted when a frame wakes the assistant
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordResult {
    pub keyword: String,
    pub confidence: f32,
    pub energy: f64,
    pub timestamp: Instant,
}

/// Mean of squared samples. Empty frames have zero energy.
pub fn frame_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();
    sum / samples.len() as f64
}

#[derive(Debug)]
pub struct EnergyWakeWordDetector {
    config: WakeWordConfig,
    history: VecDeque<f64>,
    last_trigger: Option<Instant>,
    silence_since: Option<Instant>,
    rearmed: bool,
}

impl EnergyWakeWordDetector {
    pub fn new(config: WakeWordConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
            last_trigger: None,
            silence_since: None,
            rearmed: true,
        }
    }

    pub fn config(&self) -> &WakeWordConfig {
        &self.config
    }

    /// Mean of the quietest `baseline_fraction` of the history
    pub fn baseline(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.history.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let keep = ((sorted.len() as f64 * self.config.baseline_fraction).round() as usize)
            .clamp(1, sorted.len());
        sorted[..keep].iter().sum::<f64>() / keep as f64
    }

    pub fn silence_threshold(&self) -> f64 {
        self.baseline() * self.config.silence_multiplier
    }

    pub fn speech_threshold(&self) -> f64 {
        (self.baseline() * self.config.spike_multiplier)
            .max(self.config.energy_floor)
            .min(self.config.threshold_ceiling)
    }

    /// Feed one frame captured at `now`. Returns a result when it wakes the assistant.
    pub fn process_frame(&mut self, samples: &[i16], now: Instant) -> Option<WakeWordResult> {
        let energy = frame_energy(samples);
        let silence_threshold = self.silence_threshold();
        let speech_threshold = self.speech_threshold();

        self.track_silence(energy, silence_threshold, now);
        self.push_history(energy);

        if energy <= speech_threshold || energy <= self.config.energy_floor {
            return None;
        }

        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.config.cooldown {
                log::debug!("🔇 Spike ignored during cool-down (energy {:.0})", energy);
                return None;
            }
            if !self.rearmed {
                log::debug!("🔇 Spike ignored, no silence since last wake");
                return None;
            }
        }

        self.last_trigger = Some(now);
        self.rearmed = false;
        self.silence_since = None;

        log::info!(
            "🎤 Wake detected: energy {:.0} over threshold {:.0}",
            energy,
            speech_threshold
        );

        Some(WakeWordResult {
            keyword: self.config.keyword.clone(),
            confidence: self.config.confidence,
            energy,
            timestamp: now,
        })
    }

    fn track_silence(&mut self, energy: f64, silence_threshold: f64, now: Instant) {
        if energy < silence_threshold || energy == 0.0 {
            let since = *self.silence_since.get_or_insert(now);
            if !self.rearmed && now.saturating_duration_since(since) >= self.config.min_silence {
                log::debug!("Detector re-armed after {:?} of silence", now - since);
                self.rearmed = true;
            }
        } else {
            self.silence_since = None;
        }
    }

    fn push_history(&mut self, energy: f64) {
        self.history.push_back(energy);
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
    }

    /// Forget history and timers
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_trigger = None;
        self.silence_since = None;
        self.rearmed = true;
    }
}

impl Default for EnergyWakeWordDetector {
    fn default() -> Self {
        Self::new(WakeWordConfig::default())
    }
}
