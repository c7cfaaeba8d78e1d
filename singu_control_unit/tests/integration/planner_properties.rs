//! Property tests for the planner and its filter helpers.

use std::time::Duration;

use proptest::prelude::*;
use singu_common::axis::ConveyorTopology;
use singu_common::frame::{SpeedSet, SpeedUnit};
use singu_common::line::{AxisMechanics, PlannerConfig, PlannerParams};
use singu_control_unit::planner::ramp::ramp_step;
use singu_control_unit::{PlannerStatus, SpeedPlanner};

fn planner(accel: f64, window: usize, hold: bool) -> SpeedPlanner {
    let mechanics = AxisMechanics {
        diameter_m: 0.1,
        gear_ratio: 3.0,
        pulses_per_rev: 4096,
    };
    let mut config = PlannerConfig::uniform(2, mechanics);
    config.max_belt_speed_mps = 100.0;
    config.min_belt_speed_mps = -100.0;
    let params = PlannerParams {
        min_rpm: -3000.0,
        max_rpm: 3000.0,
        smoothing_window: window,
        max_accel_rpm_per_sec: accel,
        sampling_period: Duration::from_millis(10),
        hold_on_no_frame: hold,
    };
    SpeedPlanner::new(config, params).unwrap()
}

proptest! {
    /// Gap of exactly one is Running; any other gap is Degraded.
    #[test]
    fn status_matches_sequence_gap(first in -1_000_000i64..1_000_000, gap in -50i64..50) {
        let topo = ConveyorTopology::sequential(1, 1).unwrap();
        let mut p = planner(1000.0, 3, true);
        p.plan(&topo, &SpeedSet::now(first, SpeedUnit::Rpm, vec![1.0], vec![1.0])).unwrap();
        prop_assert_eq!(p.status(), PlannerStatus::Idle);

        p.plan(&topo, &SpeedSet::now(first + gap, SpeedUnit::Rpm, vec![1.0], vec![1.0])).unwrap();
        let expected = if gap == 1 { PlannerStatus::Running } else { PlannerStatus::Degraded };
        prop_assert_eq!(p.status(), expected);
    }

    /// Output never moves more than accel × dt per call.
    #[test]
    fn ramp_bounds_each_step(
        accel in 10.0..5000.0f64,
        targets in prop::collection::vec((-5000.0..5000.0f64, -5000.0..5000.0f64), 1..40),
    ) {
        let topo = ConveyorTopology::sequential(1, 1).unwrap();
        let mut p = planner(accel, 1, false);
        let bound = accel * 0.01 + 1e-9;
        let mut prev = [0.0f64; 2];
        for (i, (a, b)) in targets.into_iter().enumerate() {
            let set = SpeedSet::now(i as i64, SpeedUnit::Rpm, vec![a], vec![b]);
            let out = p.plan(&topo, &set).unwrap();
            for slot in 0..2 {
                prop_assert!((out[slot].value() - prev[slot]).abs() <= bound);
                prop_assert!(out[slot].value().abs() <= 3000.0 + 1e-9);
                prev[slot] = out[slot].value();
            }
        }
    }

    #[test]
    fn ramp_step_never_overshoots(current in -1e4..1e4f64, target in -1e4..1e4f64, step in 0.0..500.0f64) {
        let next = ramp_step(current, target, step);
        prop_assert!((next - current).abs() <= step + 1e-9);
        let lo = current.min(target);
        let hi = current.max(target);
        prop_assert!(next >= lo - 1e-9 && next <= hi + 1e-9);
    }
}
