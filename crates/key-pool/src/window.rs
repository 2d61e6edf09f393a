//! Sliding-window call counters
//!
//! A window keeps the timestamps of recent calls and prunes the ones older
//! than its span on every check. There is no fixed reset boundary: a slot
//! frees exactly `span` after the call that used it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Timestamps of calls inside a trailing span, bounded by a ceiling.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    span: Duration,
    ceiling: u32,
    stamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(span: Duration, ceiling: u32) -> Self {
        Self {
            span,
            ceiling,
            stamps: VecDeque::new(),
        }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Drop timestamps that fell out of the window. Stamps are appended in
    /// order, so the expired ones are always at the front.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_duration_since(oldest) >= self.span {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Calls inside the window at `now`.
    pub fn count(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.stamps.len() as u32
    }

    /// True when one more call at `now` would exceed the ceiling.
    pub fn would_exceed(&mut self, now: Instant) -> bool {
        self.count(now) >= self.ceiling
    }

    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.ceiling.saturating_sub(self.count(now))
    }

    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.stamps.push_back(now);
    }

    /// Time until the next slot opens. Zero when a slot is free now.
    pub fn next_free_in(&mut self, now: Instant) -> Duration {
        if !self.would_exceed(now) {
            return Duration::ZERO;
        }
        // The window is full, so the slot that frees first belongs to the
        // call `count - ceiling` positions from the front.
        let excess = self.stamps.len() - self.ceiling as usize;
        match self.stamps.get(excess) {
            Some(&stamp) => (stamp + self.span).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Per-credential limiter enforcing a minute window and a day window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    minute: SlidingWindow,
    day: SlidingWindow,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        Self {
            minute: SlidingWindow::new(MINUTE, per_minute),
            day: SlidingWindow::new(DAY, per_day),
        }
    }

    pub fn would_exceed(&mut self, now: Instant) -> bool {
        self.minute.would_exceed(now) || self.day.would_exceed(now)
    }

    pub fn record(&mut self, now: Instant) {
        self.minute.record(now);
        self.day.record(now);
    }

    /// Longest of the two windows' waits: both must have a slot.
    pub fn next_free_in(&mut self, now: Instant) -> Duration {
        self.minute.next_free_in(now).max(self.day.next_free_in(now))
    }

    pub fn minute(&mut self) -> &mut SlidingWindow {
        &mut self.minute
    }

    pub fn day(&mut self) -> &mut SlidingWindow {
        &mut self.day
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_counts_and_expires() {
        let mut w = SlidingWindow::new(MINUTE, 3);
        let start = Instant::now();
        w.record(start);
        w.record(start + Duration::from_secs(10));
        assert_eq!(w.count(start + Duration::from_secs(10)), 2);

        // First stamp leaves exactly one span after it was recorded.
        assert_eq!(w.count(start + Duration::from_secs(60)), 1);
        assert_eq!(w.count(start + Duration::from_secs(70)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn would_exceed_at_ceiling() {
        let mut w = SlidingWindow::new(MINUTE, 2);
        let now = Instant::now();
        assert!(!w.would_exceed(now));
        w.record(now);
        assert!(!w.would_exceed(now));
        w.record(now);
        assert!(w.would_exceed(now));
        assert_eq!(w.remaining(now), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn next_free_in_tracks_oldest_stamp() {
        let mut w = SlidingWindow::new(MINUTE, 2);
        let start = Instant::now();
        w.record(start);
        w.record(start + Duration::from_secs(20));

        let now = start + Duration::from_secs(30);
        assert_eq!(w.next_free_in(now), Duration::from_secs(30));

        let later = start + Duration::from_secs(60);
        assert_eq!(w.next_free_in(later), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn next_free_in_is_zero_with_room() {
        let mut w = SlidingWindow::new(MINUTE, 5);
        let now = Instant::now();
        w.record(now);
        assert_eq!(w.next_free_in(now), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_blocks_on_daily_ceiling() {
        let mut limiter = RateLimiter::new(10, 3);
        let start = Instant::now();
        for i in 0..3 {
            limiter.record(start + MINUTE * i);
        }
        let now = start + MINUTE * 5;
        assert!(limiter.would_exceed(now));
        // Minute window is empty; the day window decides the wait.
        assert_eq!(limiter.minute().count(now), 0);
        assert_eq!(limiter.next_free_in(now), DAY - MINUTE * 5);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_blocks_on_minute_ceiling() {
        let mut limiter = RateLimiter::new(2, 100);
        let now = Instant::now();
        limiter.record(now);
        limiter.record(now);
        assert!(limiter.would_exceed(now));
        assert_eq!(limiter.next_free_in(now), MINUTE);
        assert_eq!(limiter.day().remaining(now), 98);
    }
}
