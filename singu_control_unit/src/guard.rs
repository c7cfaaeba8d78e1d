//! Frame guard: sequence and heartbeat supervision.
//!
//! Every decoded speed frame passes through [`FrameGuard::evaluate`] before
//! planning. The guard drops duplicates, late (reordered) frames and frames
//! that jump too far ahead, and scales accepted frames down by the degrade
//! scale while the upstream heartbeat is stale.
//!
//! # Sequence rules
//!
//! | Condition                                   | Result                |
//! |---------------------------------------------|-----------------------|
//! | first frame                                 | accept                |
//! | sequence in recent history                  | drop, `Duplicate`     |
//! | sequence <= highest, not in history         | drop, `Stale`         |
//! | sequence > highest + W                      | drop, `OutOfWindow`   |
//! | previous frame dropped far out of range and | resync: clear history,|
//! | this sequence = previous + 1                | accept                |
//! | otherwise                                   | accept                |
//!
//! State is behind one `parking_lot::Mutex`, so concurrent callers see
//! each frame evaluated exactly once.

use std::fmt;
use std::time::{Duration, Instant};

use heapless::Deque;
use parking_lot::Mutex;
use singu_common::config::ConfigError;
use singu_common::consts::MAX_SEQUENCE_WINDOW;
use singu_common::frame::SpeedSet;
use singu_common::line::GuardConfig;
use tracing::{debug, info};

// ─── Decision ───────────────────────────────────────────────────────

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Duplicate,
    OutOfWindow,
    Stale,
}

impl DropReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate sequence",
            Self::OutOfWindow => "sequence out of window",
            Self::Stale => "stale sequence",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardDecision {
    pub should_apply: bool,
    pub reason: Option<DropReason>,
    /// Frame to plan from; `None` when dropped.
    pub output: Option<SpeedSet>,
    /// Output was scaled by the degrade scale (stale heartbeat).
    pub degraded_applied: bool,
}

impl GuardDecision {
    fn accept(output: SpeedSet, degraded_applied: bool) -> Self {
        Self {
            should_apply: true,
            reason: None,
            output: Some(output),
            degraded_applied,
        }
    }

    fn dropped(reason: DropReason) -> Self {
        Self {
            should_apply: false,
            reason: Some(reason),
            output: None,
            degraded_applied: false,
        }
    }
}

/// Running counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub accepted: u64,
    pub degraded: u64,
    pub duplicate: u64,
    pub stale: u64,
    pub out_of_window: u64,
    pub resyncs: u64,
}

// ─── Guard ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct GuardState {
    history: Deque<i64, MAX_SEQUENCE_WINDOW>,
    highest: Option<i64>,
    /// Sequence of the immediately preceding frame if it was dropped far
    /// out of range.
    resync_candidate: Option<i64>,
    last_heartbeat: Instant,
    stats: GuardStats,
}

impl GuardState {
    fn new(now: Instant) -> Self {
        Self {
            history: Deque::new(),
            highest: None,
            resync_candidate: None,
            last_heartbeat: now,
            stats: GuardStats::default(),
        }
    }

    fn clear_sequence(&mut self) {
        self.history.clear();
        self.highest = None;
        self.resync_candidate = None;
    }

    fn remember(&mut self, sequence: i64, window: usize) {
        while self.history.len() >= window {
            self.history.pop_front();
        }
        // Cannot fail: at least one slot was freed above.
        let _ = self.history.push_back(sequence);
        self.highest = Some(self.highest.map_or(sequence, |h| h.max(sequence)));
    }
}

/// Sequence + heartbeat supervisor.
#[derive(Debug)]
pub struct FrameGuard {
    config: GuardConfig,
    state: Mutex<GuardState>,
}

impl FrameGuard {
    /// Build a guard. The heartbeat clock starts now (grace period).
    pub fn new(config: GuardConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(GuardState::new(Instant::now())),
        })
    }

    #[inline]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn evaluate(&self, set: SpeedSet) -> GuardDecision {
        self.evaluate_at(set, Instant::now())
    }

    /// Evaluate `set` as if received at `now`.
    pub fn evaluate_at(&self, set: SpeedSet, now: Instant) -> GuardDecision {
        let window = self.config.sequence_window;
        let sequence = set.sequence();
        let mut st = self.state.lock();
        let candidate = st.resync_candidate.take();

        if let Some(highest) = st.highest {
            let far_ahead = sequence.saturating_sub(highest) > window as i64;
            let far_behind = highest.saturating_sub(sequence) > window as i64;
            let resync = (far_ahead || far_behind) && candidate == Some(sequence.wrapping_sub(1));

            if resync {
                info!(from = highest, to = sequence, "sequence resynchronised");
                st.clear_sequence();
                st.stats.resyncs += 1;
            } else if st.history.iter().any(|s| *s == sequence) {
                st.stats.duplicate += 1;
                debug!(sequence, "frame dropped: duplicate");
                return GuardDecision::dropped(DropReason::Duplicate);
            } else if sequence <= highest {
                if far_behind {
                    st.resync_candidate = Some(sequence);
                }
                st.stats.stale += 1;
                debug!(sequence, highest, "frame dropped: stale");
                return GuardDecision::dropped(DropReason::Stale);
            } else if far_ahead {
                st.resync_candidate = Some(sequence);
                st.stats.out_of_window += 1;
                debug!(sequence, highest, window, "frame dropped: out of window");
                return GuardDecision::dropped(DropReason::OutOfWindow);
            }
        }

        st.remember(sequence, window);
        st.stats.accepted += 1;

        let stale = now.saturating_duration_since(st.last_heartbeat) > self.config.heartbeat_timeout;
        if stale {
            st.stats.degraded += 1;
            drop(st);
            debug!(sequence, scale = self.config.degrade_scale, "heartbeat stale, frame degraded");
            GuardDecision::accept(set.scaled(self.config.degrade_scale), true)
        } else {
            GuardDecision::accept(set, false)
        }
    }

    pub fn record_heartbeat(&self) {
        self.record_heartbeat_at(Instant::now());
    }

    pub fn record_heartbeat_at(&self, now: Instant) {
        let mut st = self.state.lock();
        if now > st.last_heartbeat {
            st.last_heartbeat = now;
        }
    }

    /// Time since the last heartbeat (or construction / reset).
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.lock().last_heartbeat)
    }

    pub fn is_heartbeat_stale(&self, now: Instant) -> bool {
        self.heartbeat_age(now) > self.config.heartbeat_timeout
    }

    /// Forget sequence history; the next frame is treated as the first.
    pub fn reset_sequence(&self) {
        self.state.lock().clear_sequence();
    }

    /// Forget sequence history and restart the heartbeat grace period.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.clear_sequence();
        st.last_heartbeat = Instant::now();
    }

    pub fn highest_sequence(&self) -> Option<i64> {
        self.state.lock().highest
    }

    pub fn stats(&self) -> GuardStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use singu_common::frame::SpeedUnit;

    fn guard(window: usize) -> FrameGuard {
        FrameGuard::new(GuardConfig {
            sequence_window: window,
            heartbeat_timeout: Duration::from_millis(500),
            degrade_scale: 0.3,
        })
        .unwrap()
    }

    fn set(seq: i64) -> SpeedSet {
        SpeedSet::now(seq, SpeedUnit::MetersPerSecond, vec![1.0, 2.0], vec![])
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = GuardConfig {
            sequence_window: 0,
            ..GuardConfig::default()
        };
        assert!(FrameGuard::new(cfg).is_err());
    }

    #[test]
    fn first_frame_accepted_then_in_order() {
        let g = guard(8);
        let now = Instant::now();
        assert!(g.evaluate_at(set(100), now).should_apply);
        assert!(g.evaluate_at(set(101), now).should_apply);
        assert!(g.evaluate_at(set(105), now).should_apply);
        assert_eq!(g.highest_sequence(), Some(105));
    }

    #[test]
    fn duplicate_dropped() {
        let g = guard(8);
        let now = Instant::now();
        g.evaluate_at(set(1), now);
        let d = g.evaluate_at(set(1), now);
        assert!(!d.should_apply);
        assert_eq!(d.reason, Some(DropReason::Duplicate));
        assert!(d.output.is_none());
        assert_eq!(d.reason.map(|r| r.to_string()).as_deref(), Some("duplicate sequence"));
    }

    #[test]
    fn reordered_frame_is_stale() {
        let g = guard(8);
        let now = Instant::now();
        g.evaluate_at(set(10), now);
        g.evaluate_at(set(12), now);
        let d = g.evaluate_at(set(11), now);
        assert_eq!(d.reason, Some(DropReason::Stale));
        // Highest never rolls back.
        assert_eq!(g.highest_sequence(), Some(12));
    }

    #[test]
    fn jump_beyond_window_dropped() {
        let g = guard(4);
        let now = Instant::now();
        g.evaluate_at(set(1), now);
        assert!(g.evaluate_at(set(5), now).should_apply);
        let d = g.evaluate_at(set(10), now);
        assert_eq!(d.reason, Some(DropReason::OutOfWindow));
        // An unrelated frame clears the candidate.
        assert!(g.evaluate_at(set(6), now).should_apply);
        assert_eq!(g.evaluate_at(set(11), now).reason, Some(DropReason::OutOfWindow));
    }

    #[test]
    fn consecutive_far_frames_resync() {
        let g = guard(4);
        let now = Instant::now();
        g.evaluate_at(set(1), now);
        assert_eq!(g.evaluate_at(set(1000), now).reason, Some(DropReason::OutOfWindow));
        let d = g.evaluate_at(set(1001), now);
        assert!(d.should_apply);
        assert_eq!(g.highest_sequence(), Some(1001));
        assert_eq!(g.stats().resyncs, 1);
    }

    #[test]
    fn upstream_restart_resyncs_backwards() {
        let g = guard(4);
        let now = Instant::now();
        g.evaluate_at(set(5000), now);
        assert_eq!(g.evaluate_at(set(1), now).reason, Some(DropReason::Stale));
        assert!(g.evaluate_at(set(2), now).should_apply);
        assert_eq!(g.highest_sequence(), Some(2));
    }

    #[test]
    fn history_bounded_by_window() {
        let g = guard(2);
        let now = Instant::now();
        for s in 1..=5 {
            g.evaluate_at(set(s), now);
        }
        // 3 fell out of history but is still below highest.
        assert_eq!(g.evaluate_at(set(3), now).reason, Some(DropReason::Stale));
        assert_eq!(g.evaluate_at(set(5), now).reason, Some(DropReason::Duplicate));
    }

    #[test]
    fn stale_heartbeat_scales_output() {
        let g = guard(8);
        let start = Instant::now();
        g.record_heartbeat_at(start);
        let fresh = g.evaluate_at(set(1), start + Duration::from_millis(100));
        assert!(!fresh.degraded_applied);

        let later = start + Duration::from_millis(800);
        assert!(g.is_heartbeat_stale(later));
        let d = g.evaluate_at(set(2), later);
        assert!(d.degraded_applied);
        let out = d.output.unwrap();
        assert!((out.main_speeds()[0] - 0.3).abs() < 1e-12);
        assert!((out.main_speeds()[1] - 0.6).abs() < 1e-12);
        assert_eq!(out.sequence(), 2);
    }

    #[test]
    fn heartbeat_grace_from_construction() {
        let g = guard(8);
        assert!(!g.is_heartbeat_stale(Instant::now()));
        assert!(g.heartbeat_age(Instant::now()) < Duration::from_millis(500));
    }

    #[test]
    fn reset_sequence_accepts_anything_next() {
        let g = guard(8);
        let now = Instant::now();
        g.evaluate_at(set(50), now);
        g.reset_sequence();
        assert!(g.evaluate_at(set(3), now).should_apply);
        assert_eq!(g.highest_sequence(), Some(3));
    }
}
