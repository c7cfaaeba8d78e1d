//! Runtime tuning types for the frame guard and the speed planner.
//!
//! `PlannerConfig` is the static mechanical description (fixed per planner
//! instance). `PlannerParams` is runtime tuning, swappable at any time.
//! `GuardConfig` parameterises sequence and heartbeat supervision.

use std::f64::consts::PI;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::consts::{DEFAULT_CONTROL_PERIOD, MAX_AXES, MAX_SEQUENCE_WINDOW};

/// Upper bound for the smoothing window.
pub const MAX_SMOOTHING_WINDOW: usize = 256;

// ─── Mechanics ──────────────────────────────────────────────────────

/// Mechanical description of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisMechanics {
    /// Belt roller diameter [m].
    pub diameter_m: f64,
    /// Motor revolutions per roller revolution.
    pub gear_ratio: f64,
    /// Encoder / step pulses per motor revolution.
    pub pulses_per_rev: u32,
}

impl AxisMechanics {
    /// Linear belt speed [m/s] → motor speed [RPM].
    ///
    /// ```text
    /// rpm = (v / (π·d)) · gear_ratio · 60
    /// ```
    #[inline]
    pub fn mps_to_rpm(&self, mps: f64) -> f64 {
        (mps / (PI * self.diameter_m)) * self.gear_ratio * 60.0
    }

    /// Motor speed [RPM] → linear belt speed [m/s].
    #[inline]
    pub fn rpm_to_mps(&self, rpm: f64) -> f64 {
        rpm / 60.0 / self.gear_ratio * PI * self.diameter_m
    }

    /// Motor speed [RPM] → command pulse frequency [Hz].
    #[inline]
    pub fn rpm_to_pulse_hz(&self, rpm: f64) -> f64 {
        rpm / 60.0 * self.pulses_per_rev as f64
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if !(self.diameter_m.is_finite() && self.diameter_m > 0.0) {
            return Err(ConfigError::invalid(format!(
                "axis[{index}]: diameter_m must be > 0, got {}",
                self.diameter_m
            )));
        }
        if !(self.gear_ratio.is_finite() && self.gear_ratio > 0.0) {
            return Err(ConfigError::invalid(format!(
                "axis[{index}]: gear_ratio must be > 0, got {}",
                self.gear_ratio
            )));
        }
        if self.pulses_per_rev == 0 {
            return Err(ConfigError::invalid(format!(
                "axis[{index}]: pulses_per_rev must be > 0"
            )));
        }
        Ok(())
    }
}

// ─── PlannerConfig ──────────────────────────────────────────────────

/// Static mechanical limits. Changing the axis count requires a new planner.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub axes: Vec<AxisMechanics>,
    /// Hardware belt speed ceiling [m/s].
    pub max_belt_speed_mps: f64,
    /// Hardware belt speed floor [m/s].
    pub min_belt_speed_mps: f64,
    /// Hardware belt acceleration limit [m/s²]. Zero disables the bound.
    pub max_accel_mps2: f64,
    /// Jerk limit [m/s³], forwarded to drive profiles.
    pub max_jerk_mps3: f64,
    pub control_period: Duration,
}

impl PlannerConfig {
    /// Uniform mechanics for `axis_count` axes.
    pub fn uniform(axis_count: usize, mechanics: AxisMechanics) -> Self {
        Self {
            axes: vec![mechanics; axis_count],
            max_belt_speed_mps: 5.0,
            min_belt_speed_mps: 0.0,
            max_accel_mps2: 0.0,
            max_jerk_mps3: 0.0,
            control_period: DEFAULT_CONTROL_PERIOD,
        }
    }

    #[inline]
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// Hardware RPM bounds `(min, max)` for one axis.
    pub fn rpm_bounds(&self, slot: usize) -> (f64, f64) {
        let m = &self.axes[slot];
        (m.mps_to_rpm(self.min_belt_speed_mps), m.mps_to_rpm(self.max_belt_speed_mps))
    }

    /// Hardware acceleration bound [RPM/s] for one axis, `None` when disabled.
    pub fn accel_bound_rpm_per_sec(&self, slot: usize) -> Option<f64> {
        (self.max_accel_mps2 > 0.0).then(|| self.axes[slot].mps_to_rpm(self.max_accel_mps2))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axes.is_empty() {
            return Err(ConfigError::invalid("planner needs at least one axis"));
        }
        if self.axes.len() > MAX_AXES {
            return Err(ConfigError::invalid(format!(
                "too many axes: {} (max {MAX_AXES})",
                self.axes.len()
            )));
        }
        for (i, m) in self.axes.iter().enumerate() {
            m.validate(i)?;
        }
        if !(self.max_belt_speed_mps.is_finite() && self.max_belt_speed_mps > 0.0) {
            return Err(ConfigError::invalid("max_belt_speed_mps must be > 0"));
        }
        if !self.min_belt_speed_mps.is_finite() || self.min_belt_speed_mps > self.max_belt_speed_mps {
            return Err(ConfigError::invalid(
                "min_belt_speed_mps must not exceed max_belt_speed_mps",
            ));
        }
        if !(self.max_accel_mps2 >= 0.0) || !(self.max_jerk_mps3 >= 0.0) {
            return Err(ConfigError::invalid("acceleration and jerk limits must be >= 0"));
        }
        if self.control_period.is_zero() {
            return Err(ConfigError::invalid("control_period must be > 0"));
        }
        Ok(())
    }
}

// ─── PlannerParams ──────────────────────────────────────────────────

/// Runtime planner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerParams {
    pub min_rpm: f64,
    pub max_rpm: f64,
    /// Moving-average window length [samples].
    pub smoothing_window: usize,
    pub max_accel_rpm_per_sec: f64,
    /// Period between `plan()` calls, used as `dt` by the ramp.
    pub sampling_period: Duration,
    /// Hold the last output while the planner is `Degraded`.
    pub hold_on_no_frame: bool,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            min_rpm: -3000.0,
            max_rpm: 3000.0,
            smoothing_window: 4,
            max_accel_rpm_per_sec: 2000.0,
            sampling_period: DEFAULT_CONTROL_PERIOD,
            hold_on_no_frame: true,
        }
    }
}

impl PlannerParams {
    /// Largest permitted output change per `plan()` call [RPM].
    #[inline]
    pub fn max_step_rpm(&self) -> f64 {
        self.max_accel_rpm_per_sec * self.sampling_period.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_rpm.is_finite() && self.max_rpm.is_finite()) || self.min_rpm > self.max_rpm {
            return Err(ConfigError::invalid(format!(
                "min_rpm ({}) must not exceed max_rpm ({})",
                self.min_rpm, self.max_rpm
            )));
        }
        if self.smoothing_window == 0 || self.smoothing_window > MAX_SMOOTHING_WINDOW {
            return Err(ConfigError::invalid(format!(
                "smoothing_window must be in 1..={MAX_SMOOTHING_WINDOW}, got {}",
                self.smoothing_window
            )));
        }
        if !(self.max_accel_rpm_per_sec.is_finite() && self.max_accel_rpm_per_sec > 0.0) {
            return Err(ConfigError::invalid("max_accel_rpm_per_sec must be > 0"));
        }
        if self.sampling_period.is_zero() {
            return Err(ConfigError::invalid("sampling_period must be > 0"));
        }
        Ok(())
    }
}

// ─── GuardConfig ────────────────────────────────────────────────────

/// Frame guard supervision parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardConfig {
    /// Forward sequence window `W`.
    pub sequence_window: usize,
    /// Heartbeat timeout `T`.
    pub heartbeat_timeout: Duration,
    /// Degrade scale `S`, in (0, 1].
    pub degrade_scale: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sequence_window: 32,
            heartbeat_timeout: Duration::from_millis(1000),
            degrade_scale: 0.3,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sequence_window == 0 || self.sequence_window > MAX_SEQUENCE_WINDOW {
            return Err(ConfigError::invalid(format!(
                "sequence_window must be in 1..={MAX_SEQUENCE_WINDOW}, got {}",
                self.sequence_window
            )));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::invalid("heartbeat_timeout must be > 0"));
        }
        if !(self.degrade_scale > 0.0 && self.degrade_scale <= 1.0) {
            return Err(ConfigError::invalid(format!(
                "degrade_scale must be in (0, 1], got {}",
                self.degrade_scale
            )));
        }
        Ok(())
    }
}
