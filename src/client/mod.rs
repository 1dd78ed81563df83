//! Client runtime for a voice session
//!
//! Mirrors the server's turn controller from the device side:
//! - `CapturePipeline` frames captured audio, meters it and decides turn boundaries
//! - `PlaybackQueue` plays synthesized chunks in order and flushes on barge-in
//! - `Conversation` folds server events into visible messages
//! - `connection` binds all of the above to a WebSocket, with reconnect

mod capture;
mod connection;
mod conversation;
mod playback;
mod policy;

pub use capture::{CapturePipeline, CaptureStats, FrameDisposition, FrameOutcome, OutboundSink, TurnSignal};
pub use connection::{run_with_reconnect, ClientEvent, Connection, Gesture, PendingBytes, SessionEnd};
pub use conversation::{Conversation, ConversationEntry};
pub use playback::{PlaybackChunk, PlaybackQueue, Player, TimedPlayer};
pub use policy::{BackpressurePolicy, ReconnectConfig, ReconnectPolicy};

use serde::Deserialize;

use crate::audio::EndpointConfig;

/// Which gesture ends a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    /// Speech onset opens a turn, the endpoint detector closes it
    HandsFree,
    /// Explicit press and release
    PushToTalk,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Voice endpoint, e.g. `ws://127.0.0.1:8765/ws/voice`
    pub url: String,

    /// Identity token appended as `?token=`
    pub token: Option<String>,

    /// Capture frame length
    pub frame_ms: u64,

    /// Frames are dropped while more than this many bytes await the socket
    pub max_pending_bytes: usize,

    pub mode: TriggerMode,

    /// Client-side endpointing for hands-free mode
    pub endpoint: EndpointConfig,

    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/ws/voice".to_string(),
            token: None,
            frame_ms: 20,
            max_pending_bytes: 64 * 1024,
            mode: TriggerMode::HandsFree,
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// URL with the identity token attached
    pub fn connect_url(&self) -> String {
        match &self.token {
            Some(token) if !token.is_empty() => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", self.url, sep, token)
            }
            _ => self.url.clone(),
        }
    }
}
