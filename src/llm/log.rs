//! Append-only exchange log.
//!
//! One JSON line per chat exchange: timestamp, model, endpoint, request
//! messages, and either the response summary or the upstream error. Logging
//! failures are reported and swallowed; they never fail the chat.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::client::ChatMessage;

/// Response summary stored for a successful exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedResponse {
    /// Final content text.
    pub content: String,
    /// Accumulated reasoning text.
    pub thinking: String,
    /// Number of `data:` payloads the stream carried.
    pub raw_chunk_count: usize,
    /// The first raw payload, for debugging malformed streams.
    pub raw_first_chunk: Option<String>,
}

/// Append-only JSONL log at a fixed path.
#[derive(Debug, Clone)]
pub struct ExchangeLog {
    path: PathBuf,
}

impl ExchangeLog {
    /// Log writing to the given path; the file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record a successful exchange.
    pub async fn record_success(
        &self,
        model: &str,
        endpoint: &str,
        messages: &[ChatMessage],
        response: &LoggedResponse,
    ) {
        self.append(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "model": model,
            "endpoint": endpoint,
            "messages": messages,
            "response": response,
        }))
        .await;
    }

    /// Record a failed exchange.
    pub async fn record_failure(
        &self,
        model: &str,
        endpoint: &str,
        messages: &[ChatMessage],
        status: u16,
        body: &str,
    ) {
        self.append(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "model": model,
            "endpoint": endpoint,
            "messages": messages,
            "error": { "status": status, "body": body },
        }))
        .await;
    }

    async fn append(&self, record: serde_json::Value) {
        let mut line = record.to_string();
        line.push('\n');
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;
        if let Err(error) = result {
            warn!(path = %self.path.display(), %error, "failed to append llm exchange log");
        }
    }
}
