//! Process-wide request rate limiter.
//!
//! A single monotonically advancing "next-allowed-at" timestamp gates every
//! chat call. Concurrent callers serialize on a fair mutex, so the ordered
//! sequence of acquisitions is spaced by at least the configured interval.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum spacing between outbound chat requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(3000);

/// Shared limiter: one instance per process, handed to every client.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_allowed_at: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateLimiter {
    /// Limiter with a custom spacing interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed_at: Mutex::new(None),
        }
    }

    /// Block until this caller's slot arrives. If the limiter is idle the
    /// call proceeds immediately; otherwise it waits for the previously
    /// scheduled slot and pushes the next one out by the interval.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut next = self.next_allowed_at.lock().await;
            let now = Instant::now();
            match *next {
                Some(at) if now < at => {
                    *next = Some(at + self.min_interval);
                    Some(at)
                }
                _ => {
                    *next = Some(now + self.min_interval);
                    None
                }
            }
        };
        if let Some(at) = wait_until {
            tokio::time::sleep_until(at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::default();
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_millis(3000));
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_are_globally_spaced() {
        let limiter = Arc::new(RateLimiter::default());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(3000),
                "acquisitions must be at least 3s apart, got {:?}",
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limiter_resets_to_immediate() {
        let limiter = RateLimiter::default();
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }
}
