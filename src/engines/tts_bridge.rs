//! Client for the host-run TTS bridge (`POST /speak` -> WAV bytes).

use async_trait::async_trait;
use serde::Serialize;

use super::{AudioFormat, SynthesizedAudio, Synthesizer};
use crate::audio::wav;
use crate::cancel::EpochToken;
use crate::error::{Stage, VoiceError};

/// The bridge rejects longer requests.
const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

pub struct TtsBridgeSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    voice: Option<String>,
}

impl TtsBridgeSynthesizer {
    pub fn new(client: reqwest::Client, base_url: &str, voice: Option<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/speak", base_url.trim_end_matches('/')),
            voice,
        }
    }
}

#[async_trait]
impl Synthesizer for TtsBridgeSynthesizer {
    fn name(&self) -> &str {
        "tts-bridge"
    }

    async fn synthesize(
        &self,
        text: &str,
        _cancel: &EpochToken,
    ) -> Result<SynthesizedAudio, VoiceError> {
        let text: String = text.chars().take(MAX_TEXT_CHARS).collect();

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&SpeakRequest {
                text: &text,
                voice: self.voice.as_deref(),
            })
            .send()
            .await
            .map_err(|e| {
                VoiceError::stage_with(
                    Stage::Synthesis,
                    "TTS bridge request failed",
                    Some(e.to_string()),
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoiceError::stage_with(
                Stage::Synthesis,
                format!("TTS bridge returned {}", status),
                Some(body.chars().take(200).collect()),
            ));
        }

        let bytes = resp.bytes().await.map_err(|e| {
            VoiceError::stage_with(Stage::Synthesis, "TTS body read failed", Some(e.to_string()))
        })?;

        let format = if wav::is_wav(&bytes) {
            AudioFormat::Wav
        } else {
            AudioFormat::Pcm16le
        };

        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            format,
        })
    }
}
