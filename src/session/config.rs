use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::EndpointConfig;

/// Tuning for every session served by this process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capture rate assumed until the client says `hello`
    pub default_sample_rate: u32,

    /// End the turn automatically when the endpoint detector fires
    pub auto_endpoint: bool,

    /// Endpoint detector thresholds
    pub endpoint: EndpointConfig,

    /// Deadline for one transcription call
    pub transcription_timeout_ms: u64,

    /// Deadline for starting generation and for each subsequent delta
    pub generation_timeout_ms: u64,

    /// Deadline for one synthesis call
    pub synthesis_timeout_ms: u64,

    /// Cadence of progress partials while listening
    pub partial_interval_ms: u64,

    /// Longest utterance buffered before the turn is closed automatically
    pub max_turn_audio_secs: u64,

    /// Completed turns kept as generation context
    pub max_history_turns: usize,

    /// Shortest text unit sent to synthesis
    pub min_speech_unit_chars: usize,

    /// Capacity of the per-session outbound event queue
    pub outbound_queue_len: usize,

    /// Capacity of the per-session inbound message queue
    pub inbound_queue_len: usize,

    /// Persona prompt placed ahead of the history
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_sample_rate: 16000,
            auto_endpoint: true,
            endpoint: EndpointConfig::default(),
            transcription_timeout_ms: 30_000,
            generation_timeout_ms: 60_000,
            synthesis_timeout_ms: 20_000,
            partial_interval_ms: 250,
            max_turn_audio_secs: 120,
            max_history_turns: 12,
            min_speech_unit_chars: 12,
            outbound_queue_len: 256,
            inbound_queue_len: 256,
            system_prompt: "You are Lumina, a warm and concise voice companion. \
                Keep replies short; they are spoken aloud."
                .to_string(),
        }
    }
}

impl SessionConfig {
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_millis(self.transcription_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn partial_interval(&self) -> Duration {
        Duration::from_millis(self.partial_interval_ms.max(10))
    }
}
