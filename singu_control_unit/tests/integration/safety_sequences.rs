//! Isolator behaviour over arbitrary trigger sequences.

use std::sync::Arc;

use proptest::prelude::*;
use singu_common::safety::{SafetyIsolationState, SafetyTriggerKind};
use singu_control_unit::notify::NullNotifier;
use singu_control_unit::SafetyIsolator;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Op {
    Trip,
    Degrade,
    Recover,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Trip), Just(Op::Degrade), Just(Op::Recover)]
}

fn apply(iso: &SafetyIsolator, op: Op) {
    match op {
        Op::Trip => iso.trip(SafetyTriggerKind::RemoteTrip, "trip"),
        Op::Degrade => iso.enter_degraded(SafetyTriggerKind::Disconnect, "degrade"),
        Op::Recover => iso.recover_from_degraded("recover"),
    };
}

proptest! {
    /// Once isolated, nothing but an explicit reset leaves Isolated.
    #[test]
    fn no_downgrade_from_isolated(
        before in prop::collection::vec(op(), 0..20),
        after in prop::collection::vec(op(), 0..40),
    ) {
        let iso = SafetyIsolator::new(Arc::new(NullNotifier));
        for o in before {
            apply(&iso, o);
        }
        iso.trip(SafetyTriggerKind::EmergencyStop, "estop");
        for o in after {
            apply(&iso, o);
            prop_assert_eq!(iso.state(), SafetyIsolationState::Isolated);
        }
        prop_assert!(iso.reset_isolation("operator", &CancellationToken::new()));
        prop_assert_eq!(iso.state(), SafetyIsolationState::Normal);
    }

    /// Every state change is broadcast exactly once.
    #[test]
    fn each_change_is_broadcast(ops in prop::collection::vec(op(), 0..30)) {
        let iso = SafetyIsolator::new(Arc::new(NullNotifier));
        let mut rx = iso.subscribe();
        let mut changes = 0usize;
        for o in ops {
            let before = iso.state();
            apply(&iso, o);
            if iso.state() != before {
                changes += 1;
            }
        }
        let mut received = 0usize;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        prop_assert_eq!(received, changes);
    }
}

#[tokio::test]
async fn watch_channel_tracks_latest_state() {
    let iso = Arc::new(SafetyIsolator::new(Arc::new(NullNotifier)));
    let mut state = iso.subscribe_state();

    let tripper = iso.clone();
    tokio::spawn(async move {
        tripper.enter_degraded(SafetyTriggerKind::HeartbeatTimeout, "hb");
        tripper.trip(SafetyTriggerKind::Disconnect, "link");
    });

    state
        .wait_for(|s| *s == SafetyIsolationState::Isolated)
        .await
        .unwrap();
    assert_eq!(iso.state(), SafetyIsolationState::Isolated);
}
