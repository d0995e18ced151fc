//! Streaming LLM client.
//!
//! Issues chat-completion requests to an OpenAI-compatible endpoint,
//! demultiplexes native reasoning fields and inline `<think>` tag streams,
//! enforces a process-wide rate limit and keeps an append-only exchange log.

pub mod client;
pub mod demux;
pub mod limiter;
pub mod log;

pub use client::{ChatBackend, ChatMessage, ChunkSink, LlmClient, LlmError};
pub use demux::{ChunkKind, ThinkDemux};
pub use limiter::RateLimiter;
pub use log::ExchangeLog;
