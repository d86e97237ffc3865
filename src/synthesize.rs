//! Grounded answer synthesis.
//!
//! Builds the grounding prompt from retrieved chunks and obtains an answer
//! from a completion provider, either whole or as an incremental fragment
//! stream. The system instruction pins the model to the supplied content:
//! it must answer only from that content and decline explicitly when the
//! content is insufficient.
//!
//! # Streaming
//!
//! The streaming variant is an explicit producer/consumer channel: a
//! spawned producer task pushes [`SynthesisEvent`]s into a bounded
//! `tokio::sync::mpsc` channel and the consumer pulls them. The stream is
//! finite and not restartable. Every stream ends with exactly one terminal
//! event — [`SynthesisEvent::Done`] on success or [`SynthesisEvent::Error`]
//! on a mid-stream provider failure — so consumers can distinguish
//! completion from truncation. Dropping the receiver cancels the stream:
//! the producer's next send fails, it returns, and the provider connection
//! is released with it.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::SynthesisConfig;
use crate::error::QueryError;
use crate::models::RetrievedChunk;

/// Grounding instruction prepended to every synthesis request.
const SYSTEM_PROMPT: &str = "You are an AI assistant for a textbook. Answer questions based only \
     on the provided textbook content. If you don't know the answer based on the provided \
     content, say so clearly.";

/// Channel capacity for streaming fragments.
const STREAM_BUFFER: usize = 32;

/// One event in a synthesis fragment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// An incremental piece of the answer text.
    Fragment(String),
    /// Normal end of stream; no further events follow.
    Done,
    /// Terminal provider failure; no further events follow.
    Error(String),
}

/// Trait for completion providers.
///
/// An opaque text-generation backend: given a system prompt and a user
/// message it returns generated text, whole or streamed.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Generate a complete response.
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String>;

    /// Generate a streaming response.
    ///
    /// The returned receiver yields fragments followed by exactly one
    /// terminal event. Dropping the receiver cancels generation.
    async fn complete_stream(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<mpsc::Receiver<SynthesisEvent>>;
}

/// Build the grounded system prompt: the fixed instruction plus the
/// newline-joined chunk bodies in retrieval order.
pub fn build_system_prompt(chunks: &[RetrievedChunk]) -> String {
    let mut prompt = SYSTEM_PROMPT.to_string();

    if !chunks.is_empty() {
        let context_text = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str("\n\nRelevant textbook content:\n");
        prompt.push_str(&context_text);
    }

    prompt
}

/// Synthesize a complete answer grounded in the given chunks.
pub async fn synthesize(
    provider: &dyn CompletionProvider,
    query_text: &str,
    chunks: &[RetrievedChunk],
) -> Result<String, QueryError> {
    let system_prompt = build_system_prompt(chunks);
    provider
        .complete(&system_prompt, query_text)
        .await
        .map_err(QueryError::synthesis)
}

/// Synthesize an answer as an incremental fragment stream.
pub async fn synthesize_stream(
    provider: &dyn CompletionProvider,
    query_text: &str,
    chunks: &[RetrievedChunk],
) -> Result<mpsc::Receiver<SynthesisEvent>, QueryError> {
    let system_prompt = build_system_prompt(chunks);
    provider
        .complete_stream(&system_prompt, query_text)
        .await
        .map_err(QueryError::synthesis)
}

// ============ OpenAI provider ============

/// Completion provider backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiChat {
    model: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn request_body(
        &self,
        system_prompt: &str,
        user_message: &str,
        stream: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": &self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_message },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let body = self.request_body(system_prompt, user_message, false);
        let response = self.send(&body).await?;
        let json: serde_json::Value = response.json().await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }

    async fn complete_stream(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<mpsc::Receiver<SynthesisEvent>> {
        let body = self.request_body(system_prompt, user_message, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            // Byte buffer: network chunks can split a multi-byte character,
            // so decode only whole lines.
            let mut buf: Vec<u8> = Vec::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(SynthesisEvent::Error(format!("stream read failed: {}", e)))
                            .await;
                        return;
                    }
                };

                buf.extend_from_slice(&bytes);

                // SSE frames are newline-delimited `data: <json>` lines
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if data == "[DONE]" {
                        let _ = tx.send(SynthesisEvent::Done).await;
                        return;
                    }

                    let json: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = tx
                                .send(SynthesisEvent::Error(format!(
                                    "malformed stream frame: {}",
                                    e
                                )))
                                .await;
                            return;
                        }
                    };

                    if let Some(delta) = json["choices"][0]["delta"]["content"].as_str() {
                        if !delta.is_empty()
                            && tx
                                .send(SynthesisEvent::Fragment(delta.to_string()))
                                .await
                                .is_err()
                        {
                            // Receiver dropped: the consumer cancelled.
                            return;
                        }
                    }
                }
            }

            // Upstream closed without a [DONE] frame
            let _ = tx.send(SynthesisEvent::Done).await;
        });

        Ok(rx)
    }
}

/// Create the appropriate [`CompletionProvider`] based on configuration.
pub fn create_provider(config: &SynthesisConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        other => bail!("Unknown synthesis provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(content: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: "c".to_string(),
            content: content.to_string(),
            score: Some(0.9),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_prompt_without_chunks_is_bare_instruction() {
        let prompt = build_system_prompt(&[]);
        assert_eq!(prompt, SYSTEM_PROMPT);
    }

    #[test]
    fn test_prompt_appends_chunks_newline_joined_in_order() {
        let chunks = vec![chunk("First passage."), chunk("Second passage.")];
        let prompt = build_system_prompt(&chunks);

        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.contains("Relevant textbook content:\nFirst passage.\nSecond passage."));
    }

    #[test]
    fn test_prompt_pins_to_supplied_content() {
        let prompt = build_system_prompt(&[chunk("Anything.")]);
        assert!(prompt.contains("based only"));
        assert!(prompt.contains("say so clearly"));
    }

    #[tokio::test]
    async fn test_event_channel_terminates_with_done() {
        // The event protocol itself: fragments then exactly one terminal event
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move {
            tx.send(SynthesisEvent::Fragment("Hel".to_string()))
                .await
                .unwrap();
            tx.send(SynthesisEvent::Fragment("lo".to_string()))
                .await
                .unwrap();
            tx.send(SynthesisEvent::Done).await.unwrap();
        });

        let mut text = String::new();
        let mut terminal = None;
        while let Some(ev) = rx.recv().await {
            match ev {
                SynthesisEvent::Fragment(f) => text.push_str(&f),
                other => {
                    terminal = Some(other);
                    break;
                }
            }
        }

        assert_eq!(text, "Hello");
        assert_eq!(terminal, Some(SynthesisEvent::Done));
        assert!(rx.recv().await.is_none());
    }
}
