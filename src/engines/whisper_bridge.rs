//! Client for the host-run whisper.cpp STT bridge (`POST /transcribe`).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Transcriber;
use crate::audio::{codec, wav, CANONICAL_SAMPLE_RATE};
use crate::cancel::EpochToken;
use crate::error::{Stage, VoiceError};

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

pub struct WhisperBridgeTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl WhisperBridgeTranscriber {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/transcribe", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperBridgeTranscriber {
    fn name(&self) -> &str {
        "whisper-bridge"
    }

    async fn transcribe(&self, pcm16: &[u8], cancel: &EpochToken) -> Result<String, VoiceError> {
        if pcm16.is_empty() {
            return Err(VoiceError::stage(Stage::Transcription, "no audio received"));
        }

        let samples = codec::bytes_to_i16(pcm16);
        let wav_bytes = wav::encode_wav(&samples, CANONICAL_SAMPLE_RATE).map_err(|e| {
            VoiceError::stage_with(Stage::Transcription, "failed to encode WAV", Some(e.to_string()))
        })?;

        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| {
                VoiceError::stage_with(Stage::Transcription, "invalid upload", Some(e.to_string()))
            })?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        debug!(
            "Uploading {} samples to {} (epoch {})",
            samples.len(),
            self.endpoint,
            cancel.epoch()
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                VoiceError::stage_with(
                    Stage::Transcription,
                    "STT bridge request failed",
                    Some(e.to_string()),
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoiceError::stage_with(
                Stage::Transcription,
                format!("STT bridge returned {}", status),
                Some(body.chars().take(200).collect()),
            ));
        }

        let body: TranscribeResponse = resp.json().await.map_err(|e| {
            VoiceError::stage_with(
                Stage::Transcription,
                "invalid STT bridge response",
                Some(e.to_string()),
            )
        })?;

        Ok(body.text.trim().to_string())
    }
}
