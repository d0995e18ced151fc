//! Idle session reaper.
//!
//! Background task that periodically removes sessions whose game has been
//! finished for longer than the configured TTL. Finished games linger so
//! late subscribers can still fetch the final state; the reaper is what
//! finally lets them go.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::SessionRegistry;

/// Periodic sweep over the session registry.
pub struct SessionReaper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    finished_ttl: Duration,
    cancel: CancellationToken,
}

impl SessionReaper {
    /// Reaper sweeping `registry` every `interval`, removing games finished
    /// at least `finished_ttl` ago.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        interval: Duration,
        finished_ttl: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval,
            finished_ttl,
            cancel,
        }
    }

    /// Run the sweep loop until the cancellation token fires.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    self.reap_now();
                }
            }
        }
    }

    /// One sweep pass; returns how many sessions were removed.
    pub fn reap_now(&self) -> usize {
        let reaped = self.registry.reap_finished(self.finished_ttl);
        if reaped > 0 {
            debug!(reaped, "session reaper pass");
        }
        reaped
    }
}
