//! Wire protocol between the capture/playback client and the turn controller.
//!
//! Two channel kinds share one ordered WebSocket:
//! - text frames carry JSON control/event records tagged by `"type"`
//! - binary frames carry raw PCM16LE mono audio at the session's `hello` rate
//!
//! Client → server: `hello`, `start{auto_end?}`, binary audio (or `audio_frame` JSON), `end`, `cancel`.
//! Server → client: `ready`, `partial_transcript`, `final_transcript`,
//! `assistant_delta`, `assistant_message`, `tts_chunk`, `done`, `cancelled`, `error`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::VoiceError;

/// Control message sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Declares the capture sample rate. Idle only.
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
    },
    /// Opens a new turn (Idle → Listening).
    ///
    /// `auto_end` says whether the server may close the turn when it detects
    /// the end of speech. Hands-free clients set it, push-to-talk clients
    /// clear it and always send `end`. Absent means the server's default.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_end: Option<bool>,
    },
    /// Base64 PCM16LE audio, equivalent to a binary frame.
    AudioFrame {
        pcm16le_b64: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
    },
    /// Closes the utterance (Listening → Finalizing).
    End,
    /// Abandons the active turn.
    Cancel,
}

impl ClientMessage {
    /// `start{}` leaving endpointing to the server's default
    pub fn start() -> Self {
        ClientMessage::Start { auto_end: None }
    }

    pub fn start_with(auto_end: bool) -> Self {
        ClientMessage::Start {
            auto_end: Some(auto_end),
        }
    }

    pub fn audio_frame(pcm: &[u8]) -> Self {
        ClientMessage::AudioFrame {
            pcm16le_b64: base64::engine::general_purpose::STANDARD.encode(pcm),
            sample_rate: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Event emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready,
    PartialTranscript {
        text: String,
        bytes_received: usize,
    },
    FinalTranscript {
        text: String,
        bytes_received: usize,
        duration_s: f64,
    },
    AssistantDelta {
        delta: String,
    },
    AssistantMessage {
        text: String,
    },
    TtsChunk {
        /// Position of this chunk within the turn, starting at 0.
        seq: u32,
        /// Container of `audio` (`wav` or `pcm16le`).
        format: String,
        /// Base64 encoded audio bytes.
        audio: String,
    },
    Done,
    Cancelled,
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ServerEvent {
    pub fn tts_chunk(seq: u32, format: &str, audio: &[u8]) -> Self {
        ServerEvent::TtsChunk {
            seq,
            format: format.to_string(),
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
        }
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Ready => "ready",
            ServerEvent::PartialTranscript { .. } => "partial_transcript",
            ServerEvent::FinalTranscript { .. } => "final_transcript",
            ServerEvent::AssistantDelta { .. } => "assistant_delta",
            ServerEvent::AssistantMessage { .. } => "assistant_message",
            ServerEvent::TtsChunk { .. } => "tts_chunk",
            ServerEvent::Done => "done",
            ServerEvent::Cancelled => "cancelled",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One unit of input for a session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ClientMessage),
    /// Raw PCM16LE audio from a binary frame.
    Audio(Vec<u8>),
    /// A frame that could not be understood; answered with `protocol_error`.
    Invalid(VoiceError),
}

impl Inbound {
    /// Interprets a text frame.
    pub fn from_text(text: &str) -> Self {
        match parse_client_message(text) {
            Ok(ClientMessage::AudioFrame { pcm16le_b64, .. }) => {
                match base64::engine::general_purpose::STANDARD.decode(pcm16le_b64.as_bytes()) {
                    Ok(bytes) => Inbound::Audio(bytes),
                    Err(e) => Inbound::Invalid(VoiceError::protocol_with(
                        "invalid_audio",
                        e.to_string(),
                    )),
                }
            }
            Ok(msg) => Inbound::Control(msg),
            Err(err) => Inbound::Invalid(err),
        }
    }
}

/// Parses a JSON control message, classifying failures as protocol errors.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, VoiceError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| VoiceError::protocol_with("invalid_json", e.to_string()))?;

    if !value.is_object() {
        return Err(VoiceError::protocol_with(
            "invalid_message",
            "expected a JSON object",
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| VoiceError::protocol_with("invalid_message", e.to_string()))
}
