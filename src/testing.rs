//! Test doubles for driving games without a network.
//!
//! [`ScriptedBackend`] plays canned responses in order; [`CollectedEvents`]
//! gathers everything a game emits so tests can assert on the stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::game::EventSink;
use crate::llm::{ChatBackend, ChunkKind, ChunkSink, LlmError};
use crate::types::events::{ArenaEvent, GameOverPayload, MovePayload};

/// A chat backend that returns scripted responses in order. When the script
/// runs dry it fails like an exhausted upstream.
pub struct ScriptedBackend {
    model: String,
    responses: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
    thinking: Option<String>,
}

impl ScriptedBackend {
    /// Backend that replies with `responses` in order.
    #[must_use]
    pub fn new(model: impl Into<String>, responses: &[&str]) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            delay: None,
            thinking: None,
        }
    }

    /// Sleep this long before every reply (pairs with paused-time tests).
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Emit this text as a thinking chunk before every reply.
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        _system: &str,
        _user: &str,
        sink: ChunkSink<'_>,
    ) -> Result<String, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().pop_front();
        match next {
            Some(response) => {
                if let Some(thinking) = &self.thinking {
                    sink(ChunkKind::Thinking, thinking);
                }
                sink(ChunkKind::Content, &response);
                Ok(response)
            }
            None => Err(LlmError::Upstream {
                status: 503,
                body: "scripted responses exhausted".to_string(),
            }),
        }
    }
}

/// Shared buffer of everything a game emitted.
#[derive(Clone, Default)]
pub struct CollectedEvents {
    events: Arc<Mutex<Vec<ArenaEvent>>>,
}

impl CollectedEvents {
    /// Empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An [`EventSink`] feeding this collector.
    #[must_use]
    pub fn sink(&self) -> EventSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| events.lock().push(event))
    }

    /// All collected events.
    #[must_use]
    pub fn all(&self) -> Vec<ArenaEvent> {
        self.events.lock().clone()
    }

    /// How many events of the given kind were emitted.
    #[must_use]
    pub fn count_kind(&self, kind: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// The `gameOver` payload, if one was emitted.
    #[must_use]
    pub fn game_over(&self) -> Option<GameOverPayload> {
        self.events.lock().iter().find_map(|e| match e {
            ArenaEvent::GameOver(payload) => Some(payload.clone()),
            _ => None,
        })
    }

    /// True when the stream is non-empty and ends with `gameOver`.
    #[must_use]
    pub fn is_last_event_game_over(&self) -> bool {
        self.events
            .lock()
            .last()
            .is_some_and(|e| e.kind() == "gameOver")
    }

    /// All `status` message texts, in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ArenaEvent::Status(payload) => Some(payload.message.clone()),
                _ => None,
            })
            .collect()
    }

    /// The first `move` payload, if any.
    #[must_use]
    pub fn first_move(&self) -> Option<MovePayload> {
        self.events.lock().iter().find_map(|e| match e {
            ArenaEvent::Move(payload) => Some(payload.clone()),
            _ => None,
        })
    }

    /// All `move` payloads, in order.
    #[must_use]
    pub fn moves(&self) -> Vec<MovePayload> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ArenaEvent::Move(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_backend_plays_in_order_then_fails() {
        let backend = ScriptedBackend::new("m", &["e4", "Nf3"]);
        let mut sink = |_: ChunkKind, _: &str| {};
        assert_eq!(backend.chat("s", "u", &mut sink).await.unwrap(), "e4");
        assert_eq!(backend.chat("s", "u", &mut sink).await.unwrap(), "Nf3");
        let err = backend.chat("s", "u", &mut sink).await.unwrap_err();
        assert!(matches!(err, LlmError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn collector_counts_kinds() {
        let events = CollectedEvents::new();
        let sink = events.sink();
        sink(ArenaEvent::status("one"));
        sink(ArenaEvent::status("two"));
        assert_eq!(events.count_kind("status"), 2);
        assert_eq!(events.statuses(), vec!["one", "two"]);
        assert!(!events.is_last_event_game_over());
    }
}
