//! External collaborators consumed by the turn controller.
//!
//! Each engine is reached through a narrow trait so the session never depends
//! on a concrete STT, LLM or TTS implementation:
//! - [`Transcriber`]: PCM16 mono 16 kHz bytes -> text
//! - [`Generator`]: history + utterance -> ordered stream of text deltas
//! - [`Synthesizer`]: one speakable unit of text -> audio bytes
//!
//! Every call receives the turn's [`EpochToken`]. Retries, if any, belong
//! inside the engine, never in the session.

mod ollama;
mod segment;
mod stub;
mod tts_bridge;
mod whisper_bridge;

pub use ollama::{parse_chat_line, OllamaGenerator};
pub use segment::SpeechSegmenter;
pub use stub::{StubGenerator, StubTranscriber};
pub use tts_bridge::TtsBridgeSynthesizer;
pub use whisper_bridge::WhisperBridgeTranscriber;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cancel::EpochToken;
use crate::config::EngineConfig;
use crate::error::VoiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered text deltas from the language model.
pub type DeltaStream = BoxStream<'static, Result<String, VoiceError>>;

/// Audio container of synthesized speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Pcm16le,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm16le => "pcm16le",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribes little-endian PCM16 mono audio at 16 kHz.
    async fn transcribe(&self, pcm16: &[u8], cancel: &EpochToken) -> Result<String, VoiceError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Starts a reply to `utterance` given prior turns.
    async fn generate(
        &self,
        history: &[ChatMessage],
        utterance: &str,
        cancel: &EpochToken,
    ) -> Result<DeltaStream, VoiceError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, cancel: &EpochToken)
        -> Result<SynthesizedAudio, VoiceError>;
}

/// The set of collaborators a session talks to.
#[derive(Clone)]
pub struct Engines {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn Generator>,
    /// `None` disables speech output; turns then carry no `tts_chunk`s.
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
}

impl Engines {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn Generator>,
        synthesizer: Option<Arc<dyn Synthesizer>>,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
        }
    }

    /// Builds HTTP clients for configured bridges and stubs for the rest.
    pub fn from_config(config: &EngineConfig, system_prompt: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        let transcriber: Arc<dyn Transcriber> = match config.stt_base_url.as_deref() {
            Some(url) if !url.is_empty() => {
                info!("Transcription via STT bridge at {}", url);
                Arc::new(WhisperBridgeTranscriber::new(client.clone(), url))
            }
            _ => {
                info!("No STT bridge configured, using stub transcriber");
                Arc::new(StubTranscriber::default())
            }
        };

        let generator: Arc<dyn Generator> = match config.ollama_base_url.as_deref() {
            Some(url) if !url.is_empty() => {
                info!("Generation via Ollama at {} (model {})", url, config.ollama_model);
                Arc::new(OllamaGenerator::new(
                    client.clone(),
                    url,
                    &config.ollama_model,
                    system_prompt,
                ))
            }
            _ => {
                info!("No Ollama configured, using stub generator");
                Arc::new(StubGenerator::default())
            }
        };

        let synthesizer: Option<Arc<dyn Synthesizer>> = match config.tts_base_url.as_deref() {
            Some(url) if !url.is_empty() => {
                info!("Synthesis via TTS bridge at {}", url);
                Some(Arc::new(TtsBridgeSynthesizer::new(
                    client,
                    url,
                    config.tts_voice.clone(),
                )))
            }
            _ => {
                info!("No TTS bridge configured, speech output disabled");
                None
            }
        };

        Ok(Self::new(transcriber, generator, synthesizer))
    }
}
