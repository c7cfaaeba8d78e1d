//! Command throttling and de-duplication for one drive.
//!
//! Drives over slow field buses reject commands sent too close together.
//! [`CommandGate::admit`] waits until the minimum interval since the
//! previous command has elapsed and skips values identical to the last
//! one sent.
//!
//! A value only counts as sent once its [`GatePermit`] is committed. A
//! permit dropped uncommitted (send failed, or the sending future was
//! cancelled by a timeout) releases the value so the next identical
//! command goes out.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep_until};

/// Result of [`CommandGate::admit`].
#[derive(Debug)]
pub enum GateDecision<'a> {
    /// Send the command now, then commit the permit.
    Send(GatePermit<'a>),
    /// Identical to the last command sent; skip it.
    Duplicate,
}

impl GateDecision<'_> {
    #[inline]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Reservation of the gate's last value for one in-flight send.
#[derive(Debug)]
#[must_use = "dropping a permit uncommitted releases the reserved value"]
pub struct GatePermit<'a> {
    gate: &'a CommandGate,
    value: f64,
    committed: bool,
}

impl GatePermit<'_> {
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Mark the value as delivered.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut st = self.gate.state.lock();
        if st.last_value == Some(self.value) {
            st.last_value = None;
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    next_allowed: Option<Instant>,
    last_value: Option<f64>,
}

#[derive(Debug)]
pub struct CommandGate {
    min_interval: Duration,
    state: Mutex<GateState>,
}

impl CommandGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(GateState::default()),
        }
    }

    #[inline]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the send slot for `value` and reserve it.
    ///
    /// The slot and value are reserved until the returned permit is
    /// committed or dropped.
    pub async fn admit(&self, value: f64) -> GateDecision<'_> {
        loop {
            let wait_until = {
                let mut st = self.state.lock();
                if st.last_value == Some(value) {
                    return GateDecision::Duplicate;
                }
                let now = Instant::now();
                match st.next_allowed {
                    Some(at) if at > now => at,
                    _ => {
                        st.next_allowed = Some(now + self.min_interval);
                        st.last_value = Some(value);
                        return GateDecision::Send(GatePermit {
                            gate: self,
                            value,
                            committed: false,
                        });
                    }
                }
            };
            sleep_until(wait_until).await;
        }
    }

    /// Forget the last value so the next command is always sent.
    pub fn clear(&self) {
        self.state.lock().last_value = None;
    }

    pub fn last_value(&self) -> Option<f64> {
        self.state.lock().last_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send(gate: &CommandGate, value: f64) -> bool {
        match gate.admit(value).await {
            GateDecision::Send(permit) => {
                permit.commit();
                true
            }
            GateDecision::Duplicate => false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_skipped() {
        let gate = CommandGate::new(Duration::ZERO);
        assert!(send(&gate, 100.0).await);
        assert!(!send(&gate, 100.0).await);
        assert!(send(&gate, 101.0).await);
        gate.clear();
        assert!(send(&gate, 101.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn throttles_to_min_interval() {
        let gate = CommandGate::new(Duration::from_millis(50));
        let start = Instant::now();
        send(&gate, 1.0).await;
        send(&gate, 2.0).await;
        send(&gate, 3.0).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(gate.last_value(), Some(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_interval_passed() {
        let gate = CommandGate::new(Duration::from_millis(20));
        send(&gate, 1.0).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let before = Instant::now();
        send(&gate, 2.0).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn uncommitted_permit_releases_value() {
        let gate = CommandGate::new(Duration::ZERO);
        let decision = gate.admit(100.0).await;
        assert!(!decision.is_duplicate());
        assert_eq!(gate.last_value(), Some(100.0));
        drop(decision);
        assert_eq!(gate.last_value(), None);
        assert!(send(&gate, 100.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_send_does_not_mark_value_sent() {
        let gate = CommandGate::new(Duration::ZERO);
        let slow_send = async {
            if let GateDecision::Send(permit) = gate.admit(100.0).await {
                tokio::time::sleep(Duration::from_millis(200)).await;
                permit.commit();
            }
        };
        assert!(
            tokio::time::timeout(Duration::from_millis(50), slow_send)
                .await
                .is_err()
        );
        assert_eq!(gate.last_value(), None);
        assert!(send(&gate, 100.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_permit_does_not_clear_newer_value() {
        let gate = CommandGate::new(Duration::ZERO);
        let first = gate.admit(1.0).await;
        assert!(send(&gate, 2.0).await);
        drop(first);
        assert_eq!(gate.last_value(), Some(2.0));
    }
}
