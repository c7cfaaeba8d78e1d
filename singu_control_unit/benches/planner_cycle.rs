//! Planner cycle benchmark: guard + plan for N-axis lines.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use singu_common::axis::ConveyorTopology;
use singu_common::frame::{SpeedSet, SpeedUnit};
use singu_common::line::{AxisMechanics, GuardConfig, PlannerConfig, PlannerParams};
use singu_control_unit::{FrameGuard, SpeedPlanner};

fn roller() -> AxisMechanics {
    AxisMechanics {
        diameter_m: 0.06,
        gear_ratio: 5.0,
        pulses_per_rev: 10_000,
    }
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner_cycle");

    for n_axes in [4usize, 16, 64] {
        let main = n_axes - n_axes / 4;
        let eject = n_axes / 4;
        let topology = ConveyorTopology::sequential(main, eject).unwrap();
        let mut config = PlannerConfig::uniform(n_axes, roller());
        config.max_accel_mps2 = 2.0;
        let mut planner = SpeedPlanner::new(config, PlannerParams::default()).unwrap();
        let guard = FrameGuard::new(GuardConfig {
            heartbeat_timeout: Duration::from_secs(3600),
            ..GuardConfig::default()
        })
        .unwrap();

        let mut seq = 0i64;
        group.bench_with_input(BenchmarkId::new("axes", n_axes), &n_axes, |b, &_n| {
            b.iter(|| {
                seq += 1;
                let t = seq as f64 * 0.02;
                let main_speeds = (0..main).map(|i| 1.0 + 0.5 * (t + i as f64).sin()).collect();
                let eject_speeds = (0..eject).map(|i| 0.8 + 0.2 * (t + i as f64).cos()).collect();
                let set = SpeedSet::now(seq, SpeedUnit::MetersPerSecond, main_speeds, eject_speeds);
                let decision = guard.evaluate(set);
                if let Some(out) = decision.output {
                    let rpm = planner.plan(&topology, &out).unwrap();
                    std::hint::black_box(rpm);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
