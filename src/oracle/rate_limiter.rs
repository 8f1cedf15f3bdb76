//! Rolling-window rate limiter for oracle calls.
//!
//! Tracks the timestamps of recent calls in a bounded queue. At most
//! `max_calls` fit in any rolling `window`; [`RateLimiter::acquire`] blocks
//! the calling thread until a slot frees. The window math is pure so it can
//! be tested without sleeping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            calls: VecDeque::with_capacity(max_calls.max(1)),
        }
    }

    /// Default oracle budget: 4 calls per rolling 60 seconds.
    pub fn default_oracle() -> Self {
        Self::new(4, Duration::from_secs(60))
    }

    /// How long a call arriving at `now` must wait for a free slot.
    /// Zero when the window has capacity. Does not record the call.
    pub fn wait_needed(&mut self, now: Instant) -> Duration {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if self.calls.len() < self.max_calls {
            return Duration::ZERO;
        }
        match self.calls.front() {
            Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
            None => Duration::ZERO,
        }
    }

    /// Record a call at `now` without waiting. Callers use this after
    /// `wait_needed` reports a free slot.
    pub fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
        while self.calls.len() > self.max_calls {
            self.calls.pop_front();
        }
    }

    /// Block until a slot is free, then claim it. Never drops a call.
    pub fn acquire(&mut self) {
        let wait = self.wait_needed(Instant::now());
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            std::thread::sleep(wait);
        }
        self.record(Instant::now());
    }

    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_limit_no_wait() {
        let mut rl = RateLimiter::new(4, Duration::from_secs(60));
        let t0 = Instant::now();
        for i in 0..4 {
            let now = t0 + Duration::from_secs(i);
            assert_eq!(rl.wait_needed(now), Duration::ZERO);
            rl.record(now);
        }
        assert_eq!(rl.in_flight(), 4);
    }

    #[test]
    fn test_fifth_call_waits_for_oldest() {
        let mut rl = RateLimiter::new(4, Duration::from_secs(60));
        let t0 = Instant::now();
        for i in 0..4 {
            rl.record(t0 + Duration::from_secs(i));
        }
        // At t0+10 the oldest call is 10s old: 50s until it leaves the window.
        let wait = rl.wait_needed(t0 + Duration::from_secs(10));
        assert_eq!(wait, Duration::from_secs(50));
    }

    #[test]
    fn test_window_expiry_frees_slots() {
        let mut rl = RateLimiter::new(4, Duration::from_secs(60));
        let t0 = Instant::now();
        for i in 0..4 {
            rl.record(t0 + Duration::from_secs(i));
        }
        // 61s after the oldest call, at least one slot is free again.
        assert_eq!(rl.wait_needed(t0 + Duration::from_secs(61)), Duration::ZERO);
        assert!(rl.in_flight() < 4);
    }

    #[test]
    fn test_spacing_exactly_at_window_edge() {
        let mut rl = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        rl.record(t0);
        // One nanosecond short of the window still waits.
        let almost = t0 + Duration::from_secs(60) - Duration::from_nanos(1);
        assert!(rl.wait_needed(almost) > Duration::ZERO);
        // Exactly at the window boundary the slot is free.
        assert_eq!(rl.wait_needed(t0 + Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn test_queue_stays_bounded() {
        let mut rl = RateLimiter::new(4, Duration::from_secs(60));
        let t0 = Instant::now();
        for i in 0..100 {
            rl.record(t0 + Duration::from_millis(i));
        }
        assert!(rl.in_flight() <= 4);
    }

    #[test]
    fn test_zero_max_calls_treated_as_one() {
        let mut rl = RateLimiter::new(0, Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(rl.wait_needed(t0), Duration::ZERO);
        rl.record(t0);
        assert!(rl.wait_needed(t0) > Duration::ZERO);
    }
}
