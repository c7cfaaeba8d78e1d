//! Safety isolation overlay.
//!
//! Normal ↔ Degraded → Isolated. Isolated forces every axis to stop and
//! is only left through an explicit [`SafetyIsolator::reset_isolation`].
//!
//! Transition rules live in the pure [`transition`] table; the isolator
//! applies them under one lock and fans the result out to a `watch`
//! state channel, a `broadcast` change stream and the realtime notifier.
//! Both channels are fed under the lock, so subscribers see transitions
//! in the order they were applied; `seq` orders notifier payloads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use singu_common::safety::{SafetyIsolationState, SafetyTriggerKind};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::RealtimeNotifier;

/// Broadcast capacity for [`SafetyStateChanged`] events.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notifier channel name for safety transitions.
pub const SAFETY_CHANNEL: &str = "safety";

// ─── Transition table ───────────────────────────────────────────────

/// Requests that drive the isolation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyRequest {
    Trip,
    EnterDegraded,
    RecoverFromDegraded,
    ResetIsolation,
}

/// Result of applying a request to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyTransition {
    Changed(SafetyIsolationState),
    /// Request already satisfied by the current state.
    Unchanged,
    Refused(&'static str),
}

/// Pure transition function.
pub fn transition(current: SafetyIsolationState, request: SafetyRequest) -> SafetyTransition {
    use SafetyIsolationState as S;
    use SafetyRequest as R;

    match (current, request) {
        // Any → Isolated
        (S::Normal | S::Degraded, R::Trip) => SafetyTransition::Changed(S::Isolated),
        (S::Isolated, R::Trip) => SafetyTransition::Unchanged,

        // Normal ↔ Degraded
        (S::Normal, R::EnterDegraded) => SafetyTransition::Changed(S::Degraded),
        (S::Degraded, R::EnterDegraded) => SafetyTransition::Unchanged,
        (S::Degraded, R::RecoverFromDegraded) => SafetyTransition::Changed(S::Normal),

        // Isolated → Normal only through reset
        (S::Isolated, R::ResetIsolation) => SafetyTransition::Changed(S::Normal),
        (S::Isolated, R::EnterDegraded) => SafetyTransition::Refused("isolated; reset required"),
        (S::Isolated, R::RecoverFromDegraded) => {
            SafetyTransition::Refused("isolated; reset required")
        }

        (S::Normal, R::RecoverFromDegraded) => SafetyTransition::Unchanged,
        (S::Normal | S::Degraded, R::ResetIsolation) => SafetyTransition::Refused("not isolated"),
    }
}

// ─── Events ─────────────────────────────────────────────────────────

/// Most recent trigger recorded by the isolator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyTrigger {
    pub kind: SafetyTriggerKind,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Emitted once per state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyStateChanged {
    /// Transition counter, starting at 1.
    pub seq: u64,
    pub previous: SafetyIsolationState,
    pub current: SafetyIsolationState,
    pub trigger: SafetyTriggerKind,
    pub reason: String,
    pub at: DateTime<Utc>,
}

// ─── Isolator ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    state: SafetyIsolationState,
    last_trigger: Option<SafetyTrigger>,
    seq: u64,
    isolations: u64,
}

/// Thread-safe isolation state holder. Share it behind an `Arc`.
pub struct SafetyIsolator {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SafetyIsolationState>,
    change_tx: broadcast::Sender<SafetyStateChanged>,
    notifier: Arc<dyn RealtimeNotifier>,
}

impl std::fmt::Debug for SafetyIsolator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyIsolator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SafetyIsolator {
    pub fn new(notifier: Arc<dyn RealtimeNotifier>) -> Self {
        let (state_tx, _) = watch::channel(SafetyIsolationState::Normal);
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                state: SafetyIsolationState::Normal,
                last_trigger: None,
                seq: 0,
                isolations: 0,
            }),
            state_tx,
            change_tx,
            notifier,
        }
    }

    #[inline]
    pub fn state(&self) -> SafetyIsolationState {
        self.inner.lock().state
    }

    pub fn last_trigger(&self) -> Option<SafetyTrigger> {
        self.inner.lock().last_trigger.clone()
    }

    /// Number of times the line has entered Isolated. Changes at the
    /// moment of the trip, before any subscriber hears of it.
    #[inline]
    pub fn isolation_count(&self) -> u64 {
        self.inner.lock().isolations
    }

    /// Latest-value state channel.
    pub fn subscribe_state(&self) -> watch::Receiver<SafetyIsolationState> {
        self.state_tx.subscribe()
    }

    /// Stream of every transition.
    pub fn subscribe(&self) -> broadcast::Receiver<SafetyStateChanged> {
        self.change_tx.subscribe()
    }

    /// Isolate the line. No-op when already isolated.
    pub fn trip(&self, kind: SafetyTriggerKind, reason: &str) -> bool {
        self.apply(SafetyRequest::Trip, kind, reason, false)
    }

    /// Enter Degraded from Normal. The trigger is recorded even when the
    /// request does not change state.
    pub fn enter_degraded(&self, kind: SafetyTriggerKind, reason: &str) -> bool {
        self.apply(SafetyRequest::EnterDegraded, kind, reason, true)
    }

    /// Degraded → Normal.
    pub fn recover_from_degraded(&self, reason: &str) -> bool {
        self.apply(
            SafetyRequest::RecoverFromDegraded,
            SafetyTriggerKind::Recovery,
            reason,
            false,
        )
    }

    /// Isolated → Normal. Returns false without touching state when
    /// `cancel` has fired.
    pub fn reset_isolation(&self, reason: &str, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            debug!(reason, "isolation reset cancelled");
            return false;
        }
        self.apply(
            SafetyRequest::ResetIsolation,
            SafetyTriggerKind::Recovery,
            reason,
            false,
        )
    }

    fn apply(
        &self,
        request: SafetyRequest,
        kind: SafetyTriggerKind,
        reason: &str,
        always_record: bool,
    ) -> bool {
        let at = Utc::now();
        let change = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            let outcome = transition(previous, request);

            if always_record || matches!(outcome, SafetyTransition::Changed(_)) {
                inner.last_trigger = Some(SafetyTrigger {
                    kind,
                    reason: reason.to_string(),
                    at,
                });
            }

            match outcome {
                SafetyTransition::Changed(current) => {
                    inner.state = current;
                    inner.seq += 1;
                    if current == SafetyIsolationState::Isolated {
                        inner.isolations += 1;
                    }
                    let change = SafetyStateChanged {
                        seq: inner.seq,
                        previous,
                        current,
                        trigger: kind,
                        reason: reason.to_string(),
                        at,
                    };
                    // Neither send blocks; both stay under the lock so a
                    // later transition can never overtake this one.
                    self.state_tx.send_replace(current);
                    if self.change_tx.send(change.clone()).is_err() {
                        debug!("no safety change subscribers");
                    }
                    change
                }
                SafetyTransition::Unchanged => {
                    debug!(state = %previous, ?request, ?kind, reason, "safety request already satisfied");
                    return false;
                }
                SafetyTransition::Refused(why) => {
                    warn!(state = %previous, ?request, ?kind, reason, why, "safety request refused");
                    return false;
                }
            }
        };

        match change.current {
            SafetyIsolationState::Isolated => {
                warn!(from = %change.previous, trigger = ?kind, reason, "line ISOLATED")
            }
            _ => info!(from = %change.previous, to = %change.current, trigger = ?kind, reason, "safety state changed"),
        }
        self.publish(&change);
        true
    }

    fn publish(&self, change: &SafetyStateChanged) {
        match serde_json::to_value(change) {
            Ok(payload) => {
                if let Err(e) = self.notifier.publish(SAFETY_CHANNEL, payload) {
                    warn!(error = %e, "safety notification failed");
                }
            }
            Err(e) => warn!(error = %e, "safety notification not serialisable"),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
