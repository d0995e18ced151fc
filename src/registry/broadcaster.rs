//! Per-token event fanout.
//!
//! Each subscriber is a bounded channel. Delivery never blocks the game
//! task: a subscriber whose channel is closed or full is dropped from the
//! set, and an emptied set removes the token key.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::events::ArenaEvent;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ArenaEvent>,
}

/// Token-keyed subscriber sets.
pub struct Broadcaster {
    subscribers: DashMap<String, Vec<Subscriber>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Broadcaster {
    /// Broadcaster with the given per-subscriber channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a subscriber under `token`. Returns its id (for unsubscribe) and
    /// the receiving end.
    pub fn subscribe(&self, token: &str) -> (u64, mpsc::Receiver<ArenaEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .entry(token.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(token, id, "subscriber added");
        (id, rx)
    }

    /// Remove one subscriber; an emptied set removes the token key.
    pub fn unsubscribe(&self, token: &str, id: u64) {
        let emptied = match self.subscribers.get_mut(token) {
            Some(mut subs) => {
                subs.retain(|s| s.id != id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.subscribers.remove_if(token, |_, subs| subs.is_empty());
        }
    }

    /// Deliver an event to every current subscriber under `token`, pruning
    /// any whose channel cannot accept it.
    pub fn emit(&self, token: &str, event: &ArenaEvent) {
        let emptied = match self.subscribers.get_mut(token) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.tx.try_send(event.clone()).is_ok());
                if subs.len() < before {
                    debug!(token, dropped = before - subs.len(), "pruned subscribers");
                }
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.subscribers.remove_if(token, |_, subs| subs.is_empty());
        }
    }

    /// Number of live subscribers under `token`.
    #[must_use]
    pub fn subscriber_count(&self, token: &str) -> usize {
        self.subscribers.get(token).map_or(0, |subs| subs.len())
    }

    /// Number of tokens with at least one subscriber.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.subscribers.len()
    }
}
