//! Streaming chat-completion client.
//!
//! One request per call: POST the chat body with `stream: true`, read the
//! `data:` line protocol incrementally, route reasoning and content text to
//! the caller's sink, and return the final content once the stream ends.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::demux::{ChunkKind, ThinkDemux};
use super::limiter::RateLimiter;
use super::log::{ExchangeLog, LoggedResponse};

/// Sampling temperature sent with every request.
const TEMPERATURE: f64 = 0.3;
/// Completion token cap sent with every request.
const MAX_TOKENS: u32 = 4096;

/// A single chat message in the request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// `"system"` or `"user"`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Errors from a chat call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The endpoint answered with a non-2xx status.
    #[error("upstream returned {status}: {body}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The request or stream failed below HTTP.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl LlmError {
    /// Network-class failures earn the mover a clock refund. Matched by
    /// transport kind plus the conventional substrings.
    #[must_use]
    pub fn is_network_class(&self) -> bool {
        if let Self::Transport(error) = self {
            if error.is_connect() || error.is_timeout() {
                return true;
            }
        }
        let message = self.to_string().to_lowercase();
        ["fetch", "econnrefused", "network", "enotfound", "timeout"]
            .iter()
            .any(|needle| message.contains(needle))
    }
}

/// Receiver for streamed `(kind, text)` pieces.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(ChunkKind, &str) + Send);

/// The one operation the orchestrator needs from a model. Production uses
/// [`LlmClient`]; tests script the responses.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Model label for events and logs.
    fn model(&self) -> &str;

    /// Issue one streaming chat call, delivering chunks to `sink` and
    /// returning the final trimmed content.
    async fn chat(
        &self,
        system: &str,
        user: &str,
        sink: ChunkSink<'_>,
    ) -> Result<String, LlmError>;
}

/// Incremental assembler for the `data:` line protocol. Keeps the text
/// accumulations the exchange log wants.
#[derive(Debug, Default)]
struct StreamAssembler {
    demux: ThinkDemux,
    content: String,
    thinking: String,
    chunk_count: usize,
    first_chunk: Option<String>,
}

impl StreamAssembler {
    /// Feed one line of the response body. Blank lines, the `[DONE]`
    /// terminator and malformed JSON are silently skipped.
    fn feed_line(&mut self, line: &str, sink: &mut (dyn FnMut(ChunkKind, &str) + Send)) {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        if payload == "[DONE]" {
            return;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return;
        };
        self.chunk_count += 1;
        if self.first_chunk.is_none() {
            self.first_chunk = Some(payload.to_string());
        }
        let delta = &value["choices"][0]["delta"];
        // Native reasoning fields: either spelling goes out as thinking.
        for field in ["reasoning_content", "thinking"] {
            if let Some(text) = delta[field].as_str() {
                if !text.is_empty() {
                    self.thinking.push_str(text);
                    sink(ChunkKind::Thinking, text);
                }
            }
        }
        if let Some(text) = delta["content"].as_str() {
            for (kind, piece) in self.demux.push(text) {
                self.emit(kind, &piece, sink);
            }
        }
    }

    /// End of stream: release deferred demux bytes.
    fn finish(&mut self, sink: &mut (dyn FnMut(ChunkKind, &str) + Send)) {
        if let Some((kind, piece)) = self.demux.finish() {
            self.emit(kind, &piece, sink);
        }
    }

    fn emit(&mut self, kind: ChunkKind, text: &str, sink: &mut (dyn FnMut(ChunkKind, &str) + Send)) {
        match kind {
            ChunkKind::Thinking => self.thinking.push_str(text),
            ChunkKind::Content => self.content.push_str(text),
        }
        sink(kind, text);
    }

    fn into_logged(self) -> LoggedResponse {
        LoggedResponse {
            content: self.content,
            thinking: self.thinking,
            raw_chunk_count: self.chunk_count,
            raw_first_chunk: self.first_chunk,
        }
    }
}

/// Streaming client bound to one endpoint, model and credential.
pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    limiter: Arc<RateLimiter>,
    log: Arc<ExchangeLog>,
}

impl LlmClient {
    /// Client for one side of a game.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        limiter: Arc<RateLimiter>,
        log: Arc<ExchangeLog>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            limiter,
            log,
        }
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        sink: ChunkSink<'_>,
    ) -> Result<String, LlmError> {
        self.limiter.acquire().await;

        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "stream": true,
        });

        debug!(model = %self.model, endpoint = %self.endpoint, "sending chat request");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            self.log
                .record_failure(
                    &self.model,
                    &self.endpoint,
                    &messages,
                    status.as_u16(),
                    &body_text,
                )
                .await;
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let mut assembler = StreamAssembler::default();
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    self.log
                        .record_failure(&self.model, &self.endpoint, &messages, 0, &error.to_string())
                        .await;
                    return Err(LlmError::Transport(error));
                }
            };
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                assembler.feed_line(&String::from_utf8_lossy(&line), sink);
            }
        }
        if !buffer.is_empty() {
            assembler.feed_line(&String::from_utf8_lossy(&buffer), sink);
        }
        assembler.finish(sink);

        let logged = assembler.into_logged();
        let content = logged.content.trim().to_string();
        self.log
            .record_success(&self.model, &self.endpoint, &messages, &logged)
            .await;
        Ok(content)
    }
}
