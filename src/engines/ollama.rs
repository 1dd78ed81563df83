//! Streaming chat generation against a local Ollama server.
//!
//! `POST /api/chat` with `stream: true` answers with newline-delimited JSON,
//! one record per token batch: `{"message":{"content":"..."},"done":false}`.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, DeltaStream, Generator};
use crate::cancel::EpochToken;
use crate::error::{Stage, VoiceError};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

/// Parses one NDJSON record into `(delta, done)`. Blank lines yield `None`.
pub fn parse_chat_line(line: &str) -> Result<Option<(String, bool)>, VoiceError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: ChatLine = serde_json::from_str(line).map_err(|e| {
        VoiceError::stage_with(
            Stage::Generation,
            "invalid stream record",
            Some(e.to_string()),
        )
    })?;

    if let Some(error) = parsed.error {
        return Err(VoiceError::stage_with(
            Stage::Generation,
            "model reported an error",
            Some(error),
        ));
    }

    let delta = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((delta, parsed.done)))
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: String,
}

impl OllamaGenerator {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str, system_prompt: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
        }
    }

    fn build_messages(&self, history: &[ChatMessage], utterance: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(utterance));
        messages
    }
}

type DeltaSender = mpsc::UnboundedSender<Result<String, VoiceError>>;

/// Forwards every complete line in `buf`. Returns false once the stream is over.
fn forward_lines(buf: &mut Vec<u8>, tx: &DeltaSender) -> bool {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        if !forward_line(&line, tx) {
            return false;
        }
    }
    true
}

fn forward_line(line: &[u8], tx: &DeltaSender) -> bool {
    match parse_chat_line(&String::from_utf8_lossy(line)) {
        Ok(Some((delta, done))) => {
            if !delta.is_empty() && tx.unbounded_send(Ok(delta)).is_err() {
                return false;
            }
            !done
        }
        Ok(None) => true,
        Err(e) => {
            let _ = tx.unbounded_send(Err(e));
            false
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        history: &[ChatMessage],
        utterance: &str,
        cancel: &EpochToken,
    ) -> Result<DeltaStream, VoiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: self.build_messages(history, utterance),
            stream: true,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                VoiceError::stage_with(
                    Stage::Generation,
                    "Ollama request failed",
                    Some(e.to_string()),
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoiceError::stage_with(
                Stage::Generation,
                format!("Ollama returned {}", status),
                Some(body.chars().take(200).collect()),
            ));
        }

        let (tx, rx) = mpsc::unbounded();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Generation stream abandoned (epoch {})", cancel.epoch());
                        return;
                    }
                    next = bytes.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        buf.extend_from_slice(&chunk);
                        if !forward_lines(&mut buf, &tx) {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.unbounded_send(Err(VoiceError::stage_with(
                            Stage::Generation,
                            "stream interrupted",
                            Some(e.to_string()),
                        )));
                        return;
                    }
                    None => {
                        forward_line(&buf, &tx);
                        return;
                    }
                }
            }
        });

        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_line() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(parse_chat_line(line).unwrap(), Some(("Hel".to_string(), false)));

        let last = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_chat_line(last).unwrap(), Some((String::new(), true)));

        assert_eq!(parse_chat_line("  ").unwrap(), None);
    }

    #[test]
    fn test_parse_chat_line_errors() {
        let err = parse_chat_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert_eq!(err.code(), "generation_error");
        assert_eq!(err.details(), Some("model not found"));

        assert!(parse_chat_line("not json").is_err());
    }

    #[test]
    fn test_forward_lines_handles_split_records() {
        let (tx, mut rx) = mpsc::unbounded();
        let mut buf = br#"{"message":{"content":"Hi"},"done":false}
{"message":{"con"#
            .to_vec();
        assert!(forward_lines(&mut buf, &tx));
        buf.extend_from_slice(b"tent\":\" there\"},\"done\":true}\n");
        assert!(!forward_lines(&mut buf, &tx));

        assert_eq!(rx.try_next().unwrap(), Some(Ok("Hi".to_string())));
        assert_eq!(rx.try_next().unwrap(), Some(Ok(" there".to_string())));
    }

    #[test]
    fn test_system_prompt_leads_history() {
        let gen = OllamaGenerator::new(reqwest::Client::new(), "http://localhost:11434/", "llama3", "Be brief.");
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let messages = gen.build_messages(&history, "how are you");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, super::super::Role::System);
        assert_eq!(messages[3], ChatMessage::user("how are you"));
        assert_eq!(gen.endpoint, "http://localhost:11434/api/chat");
    }
}
