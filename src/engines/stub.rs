//! Deterministic engines used when no bridge is configured.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{ChatMessage, DeltaStream, Generator, Transcriber};
use crate::audio::CANONICAL_SAMPLE_RATE;
use crate::cancel::EpochToken;
use crate::error::VoiceError;

/// Describes how much audio arrived instead of transcribing it.
#[derive(Debug, Default)]
pub struct StubTranscriber;

#[async_trait]
impl Transcriber for StubTranscriber {
    fn name(&self) -> &str {
        "stub"
    }

    async fn transcribe(&self, pcm16: &[u8], _cancel: &EpochToken) -> Result<String, VoiceError> {
        let duration_s = pcm16.len() as f64 / (CANONICAL_SAMPLE_RATE as f64 * 2.0);
        Ok(format!(
            "(stub) user spoke for ~{:.2}s ({} bytes)",
            duration_s,
            pcm16.len()
        ))
    }
}

/// Echoes the utterance back, one word per delta.
#[derive(Debug, Default)]
pub struct StubGenerator;

#[async_trait]
impl Generator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(
        &self,
        _history: &[ChatMessage],
        utterance: &str,
        _cancel: &EpochToken,
    ) -> Result<DeltaStream, VoiceError> {
        let reply = format!("I heard you. You said: {}", utterance);
        let deltas: Vec<Result<String, VoiceError>> = reply
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(stream::iter(deltas).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_transcript_reports_duration() {
        let token = EpochToken::new(1);
        let text = StubTranscriber
            .transcribe(&vec![0u8; 32000], &token)
            .await
            .unwrap();
        assert_eq!(text, "(stub) user spoke for ~1.00s (32000 bytes)");
    }

    #[tokio::test]
    async fn test_stub_reply_reassembles() {
        let token = EpochToken::new(1);
        let deltas: Vec<String> = StubGenerator
            .generate(&[], "hello there", &token)
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert!(deltas.len() > 1);
        assert_eq!(deltas.concat(), "I heard you. You said: hello there");
    }
}
