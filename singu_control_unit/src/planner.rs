//! Speed planner: per-axis RPM targets from guarded frames.
//!
//! Processing order for each `plan()` call:
//!
//! 1. shape checks (axis counts, finite values)
//! 2. unit conversion (m/s → RPM via roller mechanics)
//! 3. clamp to tuning limits, then to hardware belt-speed bounds
//! 4. status from the sequence gap (first = Idle, 1 = Running, else Degraded)
//! 5. hold last output while Degraded if `hold_on_no_frame`
//! 6. moving-average smoothing
//! 7. acceleration ramp
//!
//! `PlannerParams` live behind an `ArcSwap`; any task holding a
//! [`PlannerParamsHandle`] may swap them while the owning task keeps planning.

pub mod ramp;
pub mod smoothing;

use std::sync::Arc;

use arc_swap::ArcSwap;
use singu_common::axis::{AxisRpm, ConveyorTopology};
use singu_common::frame::{SpeedSet, SpeedUnit};
use singu_common::line::{AxisMechanics, PlannerConfig, PlannerParams};
use tracing::{debug, info};

use crate::error::PlanError;
use ramp::{effective_step, ramp_step};
use smoothing::MovingAverage;

/// Linear belt speed [m/s] → motor RPM for one axis.
#[inline]
pub fn mps_to_rpm(mps: f64, mechanics: &AxisMechanics) -> f64 {
    mechanics.mps_to_rpm(mps)
}

/// Motor RPM → linear belt speed [m/s] for one axis.
#[inline]
pub fn rpm_to_mps(rpm: f64, mechanics: &AxisMechanics) -> f64 {
    mechanics.rpm_to_mps(rpm)
}

// ─── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlannerStatus {
    /// No frame planned yet (or just reset / reconfigured).
    #[default]
    Idle,
    /// Consecutive frames.
    Running,
    /// Frame gap, duplicate or reorder seen on the last call.
    Degraded,
}

impl PlannerStatus {
    /// Status implied by the sequence of the previous and current frame.
    pub fn from_gap(previous: Option<i64>, current: i64) -> Self {
        match previous {
            None => Self::Idle,
            Some(prev) if current.saturating_sub(prev) == 1 => Self::Running,
            Some(_) => Self::Degraded,
        }
    }
}

// ─── Params handle ──────────────────────────────────────────────────

/// Shared, atomically swappable planner tuning.
#[derive(Debug, Clone)]
pub struct PlannerParamsHandle {
    params: Arc<ArcSwap<PlannerParams>>,
}

impl PlannerParamsHandle {
    pub fn load(&self) -> Arc<PlannerParams> {
        self.params.load_full()
    }

    /// Validate and publish new params. The planner picks them up on its
    /// next `plan()` call.
    pub fn store(&self, params: PlannerParams) -> Result<(), PlanError> {
        params.validate()?;
        self.params.store(Arc::new(params));
        Ok(())
    }
}

// ─── Planner ────────────────────────────────────────────────────────

/// Per-axis planner. Owned by a single task; output buffer reused.
#[derive(Debug)]
pub struct SpeedPlanner {
    config: PlannerConfig,
    params: PlannerParamsHandle,
    active_window: usize,
    smoothing: Vec<MovingAverage>,
    output: Vec<AxisRpm>,
    hw_bounds: Vec<(f64, f64)>,
    hw_accel: Vec<Option<f64>>,
    last_sequence: Option<i64>,
    status: PlannerStatus,
}

impl SpeedPlanner {
    pub fn new(config: PlannerConfig, params: PlannerParams) -> Result<Self, PlanError> {
        config.validate()?;
        params.validate()?;

        let n = config.axis_count();
        let hw_bounds = (0..n).map(|slot| config.rpm_bounds(slot)).collect();
        let hw_accel = (0..n).map(|slot| config.accel_bound_rpm_per_sec(slot)).collect();
        let window = params.smoothing_window;

        Ok(Self {
            config,
            params: PlannerParamsHandle {
                params: Arc::new(ArcSwap::from_pointee(params)),
            },
            active_window: window,
            smoothing: vec![MovingAverage::new(window); n],
            output: vec![AxisRpm::ZERO; n],
            hw_bounds,
            hw_accel,
            last_sequence: None,
            status: PlannerStatus::Idle,
        })
    }

    /// Handle for swapping params from other tasks.
    pub fn params_handle(&self) -> PlannerParamsHandle {
        self.params.clone()
    }

    pub fn params(&self) -> Arc<PlannerParams> {
        self.params.load()
    }

    #[inline]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Validate and swap params. A new smoothing window rebuilds buffers
    /// and resets status and sequence tracking.
    pub fn configure(&mut self, params: PlannerParams) -> Result<(), PlanError> {
        let window = params.smoothing_window;
        self.params.store(params)?;
        self.sync_window(window);
        Ok(())
    }

    fn sync_window(&mut self, window: usize) {
        if window == self.active_window {
            return;
        }
        info!(from = self.active_window, to = window, "smoothing window changed");
        self.active_window = window;
        self.smoothing = vec![MovingAverage::new(window); self.config.axis_count()];
        self.status = PlannerStatus::Idle;
        self.last_sequence = None;
    }

    /// Plan one cycle. The returned slice aligns with `topology` slots and
    /// is overwritten by the next call.
    pub fn plan(
        &mut self,
        topology: &ConveyorTopology,
        set: &SpeedSet,
    ) -> Result<&[AxisRpm], PlanError> {
        let params = self.params.load();
        self.sync_window(params.smoothing_window);

        let expected = self.config.axis_count();
        if topology.len() != expected || set.axis_count() != expected {
            return Err(PlanError::AxisCountMismatch {
                expected,
                topology: topology.len(),
                input: set.axis_count(),
            });
        }
        if set.main_speeds().len() != topology.main_count() {
            return Err(PlanError::MainCountMismatch {
                expected: topology.main_count(),
                actual: set.main_speeds().len(),
            });
        }
        if !set.is_finite() {
            return Err(PlanError::NonFiniteSpeed {
                sequence: set.sequence(),
            });
        }

        let sequence = set.sequence();
        let status = PlannerStatus::from_gap(self.last_sequence, sequence);
        if status != self.status {
            debug!(sequence, from = ?self.status, to = ?status, "planner status changed");
        }
        self.status = status;
        self.last_sequence = Some(self.last_sequence.map_or(sequence, |s| s.max(sequence)));

        if status == PlannerStatus::Degraded && params.hold_on_no_frame {
            return Ok(&self.output);
        }

        let dt = params.sampling_period.as_secs_f64();
        let tuning_step = params.max_step_rpm();

        for (slot, value) in set.iter().enumerate() {
            let rpm = match set.unit() {
                SpeedUnit::MetersPerSecond => self.config.axes[slot].mps_to_rpm(value),
                SpeedUnit::Rpm => value,
            };
            let (hw_min, hw_max) = self.hw_bounds[slot];
            let target = rpm.clamp(params.min_rpm, params.max_rpm).clamp(hw_min, hw_max);

            let smoothed = self.smoothing[slot].push(target);
            let step = effective_step(tuning_step, self.hw_accel[slot], dt);
            self.output[slot] = AxisRpm(ramp_step(self.output[slot].value(), smoothed, step));
        }

        Ok(&self.output)
    }

    #[inline]
    pub fn status(&self) -> PlannerStatus {
        self.status
    }

    /// Output of the most recent `plan()` call.
    #[inline]
    pub fn last_output(&self) -> &[AxisRpm] {
        &self.output
    }

    /// Clear ramp state, smoothing buffers and sequence tracking.
    pub fn reset(&mut self) {
        self.output.fill(AxisRpm::ZERO);
        self.smoothing.iter_mut().for_each(MovingAverage::reset);
        self.last_sequence = None;
        self.status = PlannerStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mechanics() -> AxisMechanics {
        AxisMechanics {
            diameter_m: 0.05,
            gear_ratio: 1.0,
            pulses_per_rev: 10_000,
        }
    }

    fn params(window: usize, accel: f64) -> PlannerParams {
        PlannerParams {
            min_rpm: -5000.0,
            max_rpm: 5000.0,
            smoothing_window: window,
            max_accel_rpm_per_sec: accel,
            sampling_period: Duration::from_millis(10),
            hold_on_no_frame: true,
        }
    }

    fn planner(axes: usize, window: usize, accel: f64) -> SpeedPlanner {
        let mut cfg = PlannerConfig::uniform(axes, mechanics());
        cfg.max_belt_speed_mps = 10.0;
        SpeedPlanner::new(cfg, params(window, accel)).unwrap()
    }

    fn rpm_set(seq: i64, main: Vec<f64>, eject: Vec<f64>) -> SpeedSet {
        SpeedSet::now(seq, SpeedUnit::Rpm, main, eject)
    }

    #[test]
    fn converts_one_meter_per_second() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut p = planner(1, 1, 1.0e9);
        let set = SpeedSet::now(1, SpeedUnit::MetersPerSecond, vec![1.0], vec![]);
        let out = p.plan(&topo, &set).unwrap();
        assert!((out[0].value() - 382.0).abs() < 0.5, "{}", out[0]);
    }

    #[test]
    fn status_follows_sequence_gap() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut p = planner(1, 1, 1.0e9);
        p.plan(&topo, &rpm_set(10, vec![1.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Idle);
        p.plan(&topo, &rpm_set(11, vec![1.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Running);
        p.plan(&topo, &rpm_set(13, vec![1.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Degraded);
        p.plan(&topo, &rpm_set(13, vec![1.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Degraded);
        p.plan(&topo, &rpm_set(14, vec![1.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Running);
    }

    #[test]
    fn hold_keeps_output_and_smoothing() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut p = planner(1, 2, 1.0e9);
        p.plan(&topo, &rpm_set(1, vec![100.0], vec![])).unwrap();
        p.plan(&topo, &rpm_set(2, vec![200.0], vec![])).unwrap();
        assert_eq!(p.last_output()[0].value(), 150.0);

        // Gap: held, buffer untouched.
        let held = p.plan(&topo, &rpm_set(5, vec![900.0], vec![])).unwrap()[0];
        assert_eq!(held.value(), 150.0);

        // Next consecutive frame averages 200 and 300, not 900.
        let out = p.plan(&topo, &rpm_set(6, vec![300.0], vec![])).unwrap()[0];
        assert_eq!(out.value(), 250.0);
    }

    #[test]
    fn without_hold_degraded_frames_apply() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut p = planner(1, 1, 1.0e9);
        let mut prm = params(1, 1.0e9);
        prm.hold_on_no_frame = false;
        p.configure(prm).unwrap();
        p.plan(&topo, &rpm_set(1, vec![10.0], vec![])).unwrap();
        let out = p.plan(&topo, &rpm_set(9, vec![20.0], vec![])).unwrap()[0];
        assert_eq!(p.status(), PlannerStatus::Degraded);
        assert_eq!(out.value(), 20.0);
    }

    #[test]
    fn ramp_limits_step() {
        let topo = ConveyorTopology::sequential(1, 1).unwrap();
        // 1000 rpm/s × 10 ms = 10 rpm per call.
        let mut p = planner(2, 1, 1000.0);
        let out = p.plan(&topo, &rpm_set(1, vec![500.0], vec![-500.0])).unwrap();
        assert_eq!(out[0].value(), 10.0);
        assert_eq!(out[1].value(), -10.0);
        let out = p.plan(&topo, &rpm_set(2, vec![500.0], vec![-500.0])).unwrap();
        assert_eq!(out[0].value(), 20.0);
    }

    #[test]
    fn hardware_accel_tightens_ramp() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut cfg = PlannerConfig::uniform(1, mechanics());
        cfg.max_belt_speed_mps = 10.0;
        cfg.max_accel_mps2 = 0.1;
        let mut p = SpeedPlanner::new(cfg, params(1, 1.0e9)).unwrap();
        let out = p.plan(&topo, &rpm_set(1, vec![1000.0], vec![])).unwrap()[0];
        let bound = mechanics().mps_to_rpm(0.1) * 0.01;
        assert!((out.value() - bound).abs() < 1e-9);
    }

    #[test]
    fn clamps_to_params_then_hardware() {
        let topo = ConveyorTopology::sequential(2, 0).unwrap();
        let mut cfg = PlannerConfig::uniform(2, mechanics());
        cfg.max_belt_speed_mps = 1.0;
        let mut prm = params(1, 1.0e9);
        prm.max_rpm = 300.0;
        let mut p = SpeedPlanner::new(cfg, prm).unwrap();
        let out = p.plan(&topo, &rpm_set(1, vec![250.0, 10_000.0], vec![])).unwrap();
        assert_eq!(out[0].value(), 250.0);
        assert_eq!(out[1].value(), 300.0);

        // Hardware bound (1 m/s ≈ 382 rpm) below params.
        let mut prm = params(1, 1.0e9);
        prm.max_rpm = 5000.0;
        p.configure(prm).unwrap();
        let out = p.plan(&topo, &rpm_set(2, vec![250.0, 10_000.0], vec![])).unwrap();
        assert!((out[1].value() - mechanics().mps_to_rpm(1.0)).abs() < 1e-9);
        // Belt floor of 0 m/s removes reverse.
        let out = p.plan(&topo, &rpm_set(3, vec![-50.0, 0.0], vec![])).unwrap();
        assert_eq!(out[0].value(), 0.0);
    }

    #[test]
    fn shape_errors() {
        let mut p = planner(2, 1, 1000.0);
        let topo = ConveyorTopology::sequential(2, 0).unwrap();
        assert!(matches!(
            p.plan(&topo, &rpm_set(1, vec![1.0], vec![])),
            Err(PlanError::AxisCountMismatch { expected: 2, input: 1, .. })
        ));
        assert!(matches!(
            p.plan(&topo, &rpm_set(1, vec![1.0], vec![1.0])),
            Err(PlanError::MainCountMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            p.plan(&topo, &rpm_set(7, vec![f64::INFINITY, 1.0], vec![])),
            Err(PlanError::NonFiniteSpeed { sequence: 7 })
        ));
        let wrong = ConveyorTopology::sequential(3, 0).unwrap();
        assert!(p.plan(&wrong, &rpm_set(1, vec![1.0, 1.0], vec![])).is_err());
    }

    #[test]
    fn window_change_via_handle_resets_tracking() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut p = planner(1, 2, 1.0e9);
        p.plan(&topo, &rpm_set(1, vec![100.0], vec![])).unwrap();
        p.plan(&topo, &rpm_set(2, vec![100.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Running);

        let handle = p.params_handle();
        handle.store(params(4, 1.0e9)).unwrap();
        // Sequence tracking restarts: gap to 50 is not Degraded.
        p.plan(&topo, &rpm_set(50, vec![100.0], vec![])).unwrap();
        assert_eq!(p.status(), PlannerStatus::Idle);
        assert_eq!(p.params().smoothing_window, 4);
    }

    #[test]
    fn invalid_params_rejected_and_not_stored() {
        let mut p = planner(1, 2, 1000.0);
        assert!(p.configure(params(0, 1000.0)).is_err());
        assert_eq!(p.params().smoothing_window, 2);
        assert!(p.params_handle().store(params(1, -1.0)).is_err());
    }

    #[test]
    fn reset_restarts_ramp_from_zero() {
        let topo = ConveyorTopology::sequential(1, 0).unwrap();
        let mut p = planner(1, 1, 1000.0);
        p.plan(&topo, &rpm_set(1, vec![500.0], vec![])).unwrap();
        p.reset();
        assert_eq!(p.last_output()[0], AxisRpm::ZERO);
        assert_eq!(p.status(), PlannerStatus::Idle);
        let out = p.plan(&topo, &rpm_set(99, vec![500.0], vec![])).unwrap();
        assert_eq!(out[0].value(), 10.0);
    }

    #[test]
    fn conversion_helpers() {
        let m = mechanics();
        let rpm = mps_to_rpm(2.0, &m);
        assert!((rpm_to_mps(rpm, &m) - 2.0).abs() < 1e-12);
    }
}
