//! Chess clock state.
//!
//! Millisecond bookkeeping for both sides. Debits happen at turn end from
//! wall clock; the live query subtracts the running turn's elapsed time so
//! displays can count down between moves.

use tokio::time::Instant;

use crate::types::events::ClockPayload;
use crate::types::Color;

/// Clock state for one game.
#[derive(Debug, Clone)]
pub struct ClockState {
    /// White's banked milliseconds.
    pub time_white_ms: i64,
    /// Black's banked milliseconds.
    pub time_black_ms: i64,
    /// Increment added after each successful move.
    pub increment_ms: i64,
    /// True when the game has no time control.
    pub unlimited: bool,
    /// When the running turn started, if one is in progress.
    pub turn_started_at: Option<Instant>,
}

impl ClockState {
    /// A clock for an untimed game.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            time_white_ms: 0,
            time_black_ms: 0,
            increment_ms: 0,
            unlimited: true,
            turn_started_at: None,
        }
    }

    /// A bounded clock with both sides at `base_ms`.
    #[must_use]
    pub const fn bounded(base_ms: i64, increment_ms: i64) -> Self {
        Self {
            time_white_ms: base_ms,
            time_black_ms: base_ms,
            increment_ms,
            unlimited: false,
            turn_started_at: None,
        }
    }

    fn time_ms_mut(&mut self, color: Color) -> &mut i64 {
        match color {
            Color::White => &mut self.time_white_ms,
            Color::Black => &mut self.time_black_ms,
        }
    }

    /// Mark the start of a turn.
    pub fn start_turn(&mut self, now: Instant) {
        self.turn_started_at = Some(now);
    }

    /// Debit the mover for the elapsed turn. Returns the remaining bank
    /// after the debit; when it is positive the increment is added and the
    /// turn timer cleared.
    pub fn debit(&mut self, mover: Color, now: Instant) -> i64 {
        let elapsed = self
            .turn_started_at
            .map(|started| now.saturating_duration_since(started).as_millis() as i64)
            .unwrap_or(0);
        let increment_ms = self.increment_ms;
        let bank = self.time_ms_mut(mover);
        *bank -= elapsed;
        let remaining = *bank;
        if remaining > 0 {
            *bank += increment_ms;
        }
        self.turn_started_at = None;
        remaining
    }

    /// Credit milliseconds back to a side (network-failure refund).
    pub fn refund(&mut self, color: Color, ms: i64) {
        *self.time_ms_mut(color) += ms;
    }

    /// Clock payload with banked values.
    #[must_use]
    pub const fn payload(&self) -> ClockPayload {
        ClockPayload {
            white_time: self.time_white_ms,
            black_time: self.time_black_ms,
        }
    }

    /// Clock payload with the running turn's elapsed time subtracted from
    /// the active side.
    #[must_use]
    pub fn live_payload(&self, active: Color, now: Instant) -> ClockPayload {
        let mut payload = self.payload();
        if let Some(started) = self.turn_started_at {
            let elapsed = now.saturating_duration_since(started).as_millis() as i64;
            match active {
                Color::White => payload.white_time -= elapsed,
                Color::Black => payload.black_time -= elapsed,
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn debit_and_increment() {
        let mut clock = ClockState::bounded(10_000, 500);
        let start = Instant::now();
        clock.start_turn(start);
        let remaining = clock.debit(Color::White, start + Duration::from_millis(2000));
        assert_eq!(remaining, 8000);
        assert_eq!(clock.time_white_ms, 8500, "increment added after debit");
        assert_eq!(clock.time_black_ms, 10_000);
        assert!(clock.turn_started_at.is_none());
    }

    #[test]
    fn flag_fall_gets_no_increment() {
        let mut clock = ClockState::bounded(3000, 1000);
        let start = Instant::now();
        clock.start_turn(start);
        let remaining = clock.debit(Color::Black, start + Duration::from_millis(4000));
        assert_eq!(remaining, -1000);
        assert_eq!(clock.time_black_ms, -1000, "no increment on flag fall");
    }

    #[test]
    fn refund_credits_the_side() {
        let mut clock = ClockState::bounded(5000, 0);
        clock.refund(Color::White, 120_000);
        assert_eq!(clock.time_white_ms, 125_000);
        assert_eq!(clock.time_black_ms, 5000);
    }

    #[test]
    fn live_payload_counts_down_for_active_side() {
        let mut clock = ClockState::bounded(10_000, 0);
        let start = Instant::now();
        clock.start_turn(start);
        let live = clock.live_payload(Color::White, start + Duration::from_millis(1500));
        assert_eq!(live.white_time, 8500);
        assert_eq!(live.black_time, 10_000);
    }

    #[test]
    fn unlimited_clock_is_flagged() {
        let clock = ClockState::unlimited();
        assert!(clock.unlimited);
    }
}
