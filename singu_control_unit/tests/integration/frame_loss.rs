//! Frame-loss and heartbeat degrade scenarios across guard and planner.

use std::time::{Duration, Instant};

use singu_common::axis::ConveyorTopology;
use singu_common::frame::{SpeedSet, SpeedUnit};
use singu_common::line::{AxisMechanics, GuardConfig, PlannerConfig, PlannerParams};
use singu_control_unit::{DropReason, FrameGuard, PlannerStatus, SpeedPlanner};

// ── Helpers ──

fn guard(scale: f64) -> FrameGuard {
    FrameGuard::new(GuardConfig {
        sequence_window: 8,
        heartbeat_timeout: Duration::from_millis(200),
        degrade_scale: scale,
    })
    .unwrap()
}

fn roller() -> AxisMechanics {
    AxisMechanics {
        diameter_m: 0.05,
        gear_ratio: 1.0,
        pulses_per_rev: 10_000,
    }
}

/// Planner with a pass-through filter chain (window 1, unlimited ramp).
fn passthrough_planner(axes: usize) -> SpeedPlanner {
    let mut config = PlannerConfig::uniform(axes, roller());
    config.max_belt_speed_mps = 10.0;
    let params = PlannerParams {
        min_rpm: -10_000.0,
        max_rpm: 10_000.0,
        smoothing_window: 1,
        max_accel_rpm_per_sec: 1.0e9,
        sampling_period: Duration::from_millis(20),
        hold_on_no_frame: true,
    };
    SpeedPlanner::new(config, params).unwrap()
}

fn frame(seq: i64, main: Vec<f64>) -> SpeedSet {
    SpeedSet::now(seq, SpeedUnit::MetersPerSecond, main, vec![])
}

// ── Scenarios ──

#[test]
fn stale_heartbeat_scales_accepted_frame() {
    let g = guard(0.3);
    let start = Instant::now();
    g.record_heartbeat_at(start);

    let fresh = g.evaluate_at(frame(1, vec![1.0, 2.0]), start + Duration::from_millis(50));
    assert!(fresh.should_apply);
    assert!(!fresh.degraded_applied);

    let late = start + Duration::from_millis(500);
    let decision = g.evaluate_at(frame(2, vec![1.0, 2.0]), late);
    assert!(decision.should_apply);
    assert!(decision.degraded_applied);
    let out = decision.output.unwrap();
    assert!((out.main_speeds()[0] - 0.3).abs() < 1e-12);
    assert!((out.main_speeds()[1] - 0.6).abs() < 1e-12);
    assert_eq!(out.sequence(), 2);
}

#[test]
fn heartbeat_recovery_restores_full_speed() {
    let g = guard(0.5);
    let start = Instant::now();
    g.record_heartbeat_at(start);
    let late = start + Duration::from_secs(1);
    assert!(g.is_heartbeat_stale(late));
    assert!(g.evaluate_at(frame(1, vec![2.0]), late).degraded_applied);

    g.record_heartbeat_at(late);
    let d = g.evaluate_at(frame(2, vec![2.0]), late + Duration::from_millis(10));
    assert!(!d.degraded_applied);
    assert_eq!(d.output.unwrap().main_speeds(), &[2.0]);
}

#[test]
fn one_meter_per_second_on_fifty_mm_roller() {
    let topo = ConveyorTopology::sequential(1, 0).unwrap();
    let mut planner = passthrough_planner(1);
    let out = planner.plan(&topo, &frame(1, vec![1.0])).unwrap();
    assert!((out[0].value() - 382.0).abs() <= 0.5, "got {}", out[0]);
}

#[test]
fn dropped_frames_never_reach_planner() {
    let g = guard(1.0);
    let topo = ConveyorTopology::sequential(1, 0).unwrap();
    let mut planner = passthrough_planner(1);

    let stream = [(1, 1.0), (2, 1.5), (2, 9.0), (1, 9.0), (3, 2.0)];
    let mut applied = Vec::new();
    let mut drops = Vec::new();
    for (seq, v) in stream {
        let d = g.evaluate(frame(seq, vec![v]));
        match d.output {
            Some(set) => {
                let out = planner.plan(&topo, &set).unwrap();
                applied.push(out[0].value());
            }
            None => drops.push(d.reason),
        }
    }

    assert_eq!(applied.len(), 3);
    assert_eq!(drops, vec![Some(DropReason::Duplicate), Some(DropReason::Duplicate)]);
    assert_eq!(planner.status(), PlannerStatus::Running);
    let last = roller().mps_to_rpm(2.0);
    assert!((applied[2] - last).abs() < 1e-9);
}

#[test]
fn gap_after_guard_holds_planner_output() {
    let g = guard(1.0);
    let topo = ConveyorTopology::sequential(1, 0).unwrap();
    let mut planner = passthrough_planner(1);

    for seq in [1, 2] {
        let set = g.evaluate(frame(seq, vec![1.0])).output.unwrap();
        planner.plan(&topo, &set).unwrap();
    }
    let held = planner.last_output()[0];

    // 3 and 4 lost; 5 is inside the window so the guard accepts it.
    let set = g.evaluate(frame(5, vec![2.0])).output.unwrap();
    let out = planner.plan(&topo, &set).unwrap()[0];
    assert_eq!(planner.status(), PlannerStatus::Degraded);
    assert_eq!(out, held);

    let set = g.evaluate(frame(6, vec![2.0])).output.unwrap();
    let out = planner.plan(&topo, &set).unwrap()[0];
    assert_eq!(planner.status(), PlannerStatus::Running);
    assert!((out.value() - roller().mps_to_rpm(2.0)).abs() < 1e-9);
}

#[test]
fn upstream_restart_resyncs_after_two_frames() {
    let g = guard(1.0);
    for seq in 1000..1005 {
        assert!(g.evaluate(frame(seq, vec![1.0])).should_apply);
    }
    // Upstream restarted from 1: first frame dropped, second resyncs.
    assert_eq!(g.evaluate(frame(1, vec![1.0])).reason, Some(DropReason::Stale));
    assert!(g.evaluate(frame(2, vec![1.0])).should_apply);
    assert_eq!(g.highest_sequence(), Some(2));
    assert!(g.evaluate(frame(3, vec![1.0])).should_apply);
    assert_eq!(g.stats().resyncs, 1);
}
