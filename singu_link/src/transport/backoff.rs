//! Reconnect backoff with jitter.
//!
//! Delays within one failure streak never shrink: each delay is at least
//! the previous one, whatever the jitter draws. This holds even when the
//! jitter span exceeds the initial delay.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use singu_common::consts::{RECONNECT_INITIAL_DELAY, RECONNECT_JITTER, RECONNECT_MAX_DELAY};
use singu_common::line::UpstreamConfig;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Cap applied before jitter is added.
    pub max: Duration,
    /// Jitter is drawn uniformly from `[0, jitter)`.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: RECONNECT_INITIAL_DELAY,
            max: RECONNECT_MAX_DELAY,
            jitter: RECONNECT_JITTER,
        }
    }
}

impl BackoffPolicy {
    pub fn from_upstream(upstream: &UpstreamConfig) -> Self {
        Self {
            initial: upstream.backoff_initial(),
            max: upstream.backoff_max(),
            jitter: upstream.jitter(),
        }
    }

    /// Delay for the 1-indexed `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << exponent).min(self.max)
    }
}

/// Attempt counter plus jitter source.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    previous: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            previous: Duration::ZERO,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the jitter source for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Advance to the next attempt and return `(attempt, delay)`.
    pub fn next_delay(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.policy.base_delay(self.attempt);
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rng.gen_range(0..jitter_ms))
        };
        self.previous = self.previous.max(base + jitter);
        (self.attempt, self.previous)
    }

    /// Forget previous failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.previous = Duration::ZERO;
    }

    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles_then_caps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.base_delay(1), Duration::from_millis(500));
        assert_eq!(p.base_delay(2), Duration::from_millis(1000));
        assert_eq!(p.base_delay(3), Duration::from_millis(2000));
        assert_eq!(p.base_delay(6), Duration::from_secs(10));
        assert_eq!(p.base_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn three_failures_non_decreasing_with_bounded_jitter() {
        let p = BackoffPolicy::default();
        for seed in 0..64 {
            let mut b = Backoff::new(p).with_seed(seed);
            let mut previous = Duration::ZERO;
            for _ in 0..3 {
                let (attempt, delay) = b.next_delay();
                let base = p.base_delay(attempt);
                assert!(delay >= base);
                assert!(delay < base + p.jitter);
                assert!(delay >= previous, "seed {seed}: {delay:?} < {previous:?}");
                previous = delay;
            }
        }
    }

    #[test]
    fn wide_jitter_still_non_decreasing() {
        let p = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter: Duration::from_millis(500),
        };
        for seed in 0..200 {
            let mut b = Backoff::new(p).with_seed(seed);
            let delays: Vec<Duration> = (0..3).map(|_| b.next_delay().1).collect();
            assert!(
                delays.windows(2).all(|w| w[0] <= w[1]),
                "seed {seed}: {delays:?}"
            );
            assert!(delays.iter().all(|d| *d < Duration::from_millis(400) + p.jitter));
        }
    }

    #[test]
    fn delay_never_exceeds_cap_plus_jitter() {
        let p = BackoffPolicy::default();
        let mut b = Backoff::new(p).with_seed(7);
        for _ in 0..40 {
            let (_, delay) = b.next_delay();
            assert!(delay < p.max + p.jitter);
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut b = Backoff::new(BackoffPolicy {
            jitter: Duration::ZERO,
            ..BackoffPolicy::default()
        });
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempt(), 2);
        b.reset();
        assert_eq!(b.next_delay(), (1, Duration::from_millis(500)));
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let p = BackoffPolicy::default();
        let a: Vec<_> = {
            let mut b = Backoff::new(p).with_seed(42);
            (0..5).map(|_| b.next_delay()).collect()
        };
        let c: Vec<_> = {
            let mut b = Backoff::new(p).with_seed(42);
            (0..5).map(|_| b.next_delay()).collect()
        };
        assert_eq!(a, c);
    }
}
