//! Session registry.
//!
//! Maps opaque session tokens to games, to subscriber sets and to
//! shared-credential cooldown stamps. A token has at most one live game;
//! replacing it requires the prior game to be terminal or aborted.

pub mod broadcaster;
pub mod reaper;

pub use broadcaster::Broadcaster;
pub use reaper::SessionReaper;

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ArenaError;
use crate::game::{EventSink, Game};
use crate::types::events::ArenaEvent;

/// Token-keyed server state: games, subscribers and cooldown stamps.
pub struct SessionRegistry {
    games: DashMap<String, Arc<Game>>,
    broadcaster: Arc<Broadcaster>,
    cooldown: DashMap<String, Instant>,
    cooldown_window: Duration,
}

impl SessionRegistry {
    /// Registry with the given subscriber channel capacity and
    /// shared-credential cooldown window.
    #[must_use]
    pub fn new(subscriber_capacity: usize, cooldown_window: Duration) -> Self {
        Self {
            games: DashMap::new(),
            broadcaster: Arc::new(Broadcaster::new(subscriber_capacity)),
            cooldown: DashMap::new(),
            cooldown_window,
        }
    }

    /// Issue a fresh opaque token. Clients may also self-generate tokens;
    /// any non-empty string is a valid session key on first use.
    #[must_use]
    pub fn issue_token(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// The game bound to `token`, if any.
    #[must_use]
    pub fn game(&self, token: &str) -> Option<Arc<Game>> {
        self.games.get(token).map(|entry| Arc::clone(entry.value()))
    }

    /// Bind a game to `token`. Fails when a non-terminal game already
    /// exists.
    pub fn insert_game(&self, token: &str, game: Arc<Game>) -> Result<(), ArenaError> {
        match self.games.entry(token.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_terminal() {
                    occupied.insert(game);
                    Ok(())
                } else {
                    Err(ArenaError::GameInProgress)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(game);
                Ok(())
            }
        }
    }

    /// Remove and return the game bound to `token`.
    pub fn remove_game(&self, token: &str) -> Option<Arc<Game>> {
        self.games.remove(token).map(|(_, game)| game)
    }

    /// The broadcast fabric.
    #[must_use]
    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// An emit closure bound to `token`, handed to a new game.
    #[must_use]
    pub fn sink_for(&self, token: &str) -> EventSink {
        let broadcaster = Arc::clone(&self.broadcaster);
        let token = token.to_string();
        Arc::new(move |event: ArenaEvent| broadcaster.emit(&token, &event))
    }

    /// Enforce the shared-credential cooldown for `token` and stamp the
    /// window on success. Bypassed calls must not reach this method.
    pub fn check_and_stamp_cooldown(&self, token: &str) -> Result<(), ArenaError> {
        let now = Instant::now();
        let stamped_at = self.cooldown.get(token).map(|entry| *entry.value());
        if let Some(at) = stamped_at {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < self.cooldown_window {
                let remaining = self.cooldown_window - elapsed;
                debug!(token, remaining_ms = remaining.as_millis() as i64, "cooldown active");
                return Err(ArenaError::Cooldown {
                    remaining_ms: remaining.as_millis() as i64,
                });
            }
        }
        self.cooldown.insert(token.to_string(), now);
        Ok(())
    }

    /// Remove sessions whose game has been finished for at least `ttl`.
    /// Returns how many were removed.
    pub fn reap_finished(&self, ttl: Duration) -> usize {
        let now = chrono::Utc::now();
        let expired: Vec<String> = self
            .games
            .iter()
            .filter_map(|entry| {
                let finished_at = entry.value().finished_at()?;
                let age = now.signed_duration_since(finished_at).to_std().ok()?;
                (age >= ttl).then(|| entry.key().clone())
            })
            .collect();
        for token in &expired {
            self.games.remove(token);
            self.cooldown.remove(token);
            info!(token, "reaped finished session");
        }
        expired.len()
    }

    /// Number of tokens with a bound game.
    #[must_use]
    pub fn game_count(&self) -> usize {
        self.games.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameSettings, PromptSchema};
    use crate::testing::{CollectedEvents, ScriptedBackend};

    fn make_game(events: &CollectedEvents) -> Arc<Game> {
        Game::new(
            GameSettings {
                white: Some(Arc::new(ScriptedBackend::new("w", &[]))),
                black: Some(Arc::new(ScriptedBackend::new("b", &[]))),
                human_side: None,
                max_retries: 1,
                base_time_ms: None,
                increment_ms: 0,
                prompt_schema: PromptSchema::BareSan,
            },
            events.sink(),
        )
    }

    #[test]
    fn issued_tokens_are_unique() {
        let registry = SessionRegistry::new(8, Duration::from_secs(60));
        let a = registry.issue_token();
        let b = registry.issue_token();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[tokio::test]
    async fn one_live_game_per_token() {
        let registry = SessionRegistry::new(8, Duration::from_secs(60));
        let events = CollectedEvents::new();
        let first = make_game(&events);
        registry.insert_game("t", Arc::clone(&first)).unwrap();

        let second = make_game(&events);
        let err = registry.insert_game("t", Arc::clone(&second)).unwrap_err();
        assert!(matches!(err, ArenaError::GameInProgress));

        // Once the first game is terminal the token can be reused.
        first.stop();
        registry.insert_game("t", second).unwrap();
        assert_eq!(registry.game_count(), 1);
    }

    #[tokio::test]
    async fn sink_routes_to_token_subscribers() {
        let registry = SessionRegistry::new(8, Duration::from_secs(60));
        let (_id, mut rx) = registry.broadcaster().subscribe("t");
        let sink = registry.sink_for("t");
        sink(ArenaEvent::status("hello"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "status");
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_window_enforced_and_expires() {
        let registry = SessionRegistry::new(8, Duration::from_secs(1200));
        registry.check_and_stamp_cooldown("t").unwrap();

        let err = registry.check_and_stamp_cooldown("t").unwrap_err();
        let ArenaError::Cooldown { remaining_ms } = err else {
            panic!("expected cooldown error");
        };
        assert!(remaining_ms > 0);
        assert!(remaining_ms <= 1_200_000);

        tokio::time::advance(Duration::from_secs(1100)).await;
        assert!(registry.check_and_stamp_cooldown("t").is_err());

        tokio::time::advance(Duration::from_secs(101)).await;
        registry.check_and_stamp_cooldown("t").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_is_per_token() {
        let registry = SessionRegistry::new(8, Duration::from_secs(1200));
        registry.check_and_stamp_cooldown("a").unwrap();
        registry.check_and_stamp_cooldown("b").unwrap();
        assert!(registry.check_and_stamp_cooldown("a").is_err());
    }

    #[tokio::test]
    async fn reap_removes_only_old_finished_games() {
        let registry = SessionRegistry::new(8, Duration::from_secs(60));
        let events = CollectedEvents::new();

        let running = make_game(&events);
        registry.insert_game("running", running).unwrap();

        let finished = make_game(&events);
        finished.stop();
        Arc::clone(&finished).run().await;
        registry.insert_game("finished", finished).unwrap();

        // Nothing is old enough with a one-hour TTL.
        assert_eq!(registry.reap_finished(Duration::from_secs(3600)), 0);
        // With a zero TTL the finished game goes, the running one stays.
        assert_eq!(registry.reap_finished(Duration::ZERO), 1);
        assert!(registry.game("finished").is_none());
        assert!(registry.game("running").is_some());
    }
}
