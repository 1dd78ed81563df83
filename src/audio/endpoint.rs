//! Endpoint detection: decides when an utterance has ended from frame energy.
//!
//! End-of-speech requires both a minimum utterance length since turn start and
//! a trailing silence since the last frame above the speech threshold. The
//! thresholds are fixed RMS cutoffs from configuration; there is no adaptive
//! noise-floor calibration.
//!
//! Time is supplied by the caller. The server derives it from sample counts so
//! detection is deterministic for a given audio stream.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// RMS (0..1) above which a frame counts as speech.
    pub speech_rms_threshold: f32,
    /// Minimum time since turn start before an end can be signalled.
    pub min_utterance_ms: u64,
    /// Silence after the last speech frame that ends the utterance.
    pub trailing_silence_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            speech_rms_threshold: 0.015,
            min_utterance_ms: 700,
            trailing_silence_ms: 800,
        }
    }
}

impl EndpointConfig {
    pub fn min_utterance(&self) -> Duration {
        Duration::from_millis(self.min_utterance_ms)
    }

    pub fn trailing_silence(&self) -> Duration {
        Duration::from_millis(self.trailing_silence_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDecision {
    Continue,
    EndOfSpeech,
}

/// Per-turn silence/speech timer. Holds no state across turns.
#[derive(Debug, Clone)]
pub struct EndpointDetector {
    config: EndpointConfig,
    turn_start: Option<Duration>,
    last_speech: Option<Duration>,
    ended: bool,
}

impl EndpointDetector {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            turn_start: None,
            last_speech: None,
            ended: false,
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Arms the detector for a new turn beginning at `at`.
    pub fn start(&mut self, at: Duration) {
        self.turn_start = Some(at);
        self.last_speech = None;
        self.ended = false;
    }

    pub fn reset(&mut self) {
        self.turn_start = None;
        self.last_speech = None;
        self.ended = false;
    }

    pub fn is_armed(&self) -> bool {
        self.turn_start.is_some() && !self.ended
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn is_speech(&self, rms: f32) -> bool {
        rms > self.config.speech_rms_threshold
    }

    /// Observes one frame with energy `rms` ending at time `at`.
    ///
    /// Returns `EndOfSpeech` at most once per turn; later frames return `Continue`.
    pub fn observe(&mut self, rms: f32, at: Duration) -> EndpointDecision {
        let Some(turn_start) = self.turn_start else {
            return EndpointDecision::Continue;
        };
        if self.ended {
            return EndpointDecision::Continue;
        }

        if self.is_speech(rms) {
            self.last_speech = Some(at);
            return EndpointDecision::Continue;
        }

        let elapsed = at.saturating_sub(turn_start);
        let silence = at.saturating_sub(self.last_speech.unwrap_or(turn_start));

        if elapsed >= self.config.min_utterance() && silence > self.config.trailing_silence() {
            self.ended = true;
            EndpointDecision::EndOfSpeech
        } else {
            EndpointDecision::Continue
        }
    }
}

/// Running audio clock derived from sample counts.
#[derive(Debug, Clone, Default)]
pub struct AudioClock {
    samples: u64,
    sample_rate: u32,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: 0,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Advances by `samples` and returns the time at the end of them.
    pub fn advance(&mut self, samples: usize) -> Duration {
        self.samples += samples as u64;
        self.now()
    }

    pub fn now(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn reset(&mut self) {
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_detector_never_ends() {
        let mut d = EndpointDetector::new(EndpointConfig::default());
        assert_eq!(
            d.observe(0.0, Duration::from_secs(10)),
            EndpointDecision::Continue
        );
    }

    #[test]
    fn test_short_burst_does_not_end_turn() {
        let config = EndpointConfig {
            speech_rms_threshold: 0.1,
            min_utterance_ms: 1000,
            trailing_silence_ms: 200,
        };
        let mut d = EndpointDetector::new(config);
        d.start(Duration::ZERO);
        d.observe(0.5, Duration::from_millis(100));
        // 300ms of silence, but the utterance is still too short
        assert_eq!(
            d.observe(0.0, Duration::from_millis(400)),
            EndpointDecision::Continue
        );
        assert_eq!(
            d.observe(0.0, Duration::from_millis(1000)),
            EndpointDecision::EndOfSpeech
        );
    }

    #[test]
    fn test_audio_clock() {
        let mut clock = AudioClock::new(16000);
        assert_eq!(clock.advance(8000), Duration::from_millis(500));
        assert_eq!(clock.advance(8000), Duration::from_secs(1));
    }
}
