//! Multi-session chess arena server.
//!
//! Orchestrates games in which one or both players are LLMs reached through
//! an OpenAI-compatible streaming chat-completions API. Browser clients
//! observe or participate through a per-session server-sent-event stream.

pub mod api;
pub mod chess;
pub mod config;
pub mod error;
pub mod game;
pub mod llm;
pub mod registry;
pub mod testing;
pub mod types;
