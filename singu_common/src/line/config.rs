//! `singu.toml` schema.
//!
//! ```toml
//! [shared]
//! service_name = "singu-line-01"
//!
//! [upstream]
//! host = "192.168.10.20"
//! speed_port = 6001
//! position_port = 6002
//! heartbeat_port = 6003
//!
//! [controller]
//! vendor = "leadshine"
//! ip = "192.168.10.50"
//!
//! [[axes]]
//! id = 1
//! role = "main"
//! diameter_m = 0.05
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::axis::{AxisId, AxisRole, ConveyorTopology};
use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    CONNECT_TIMEOUT, DEFAULT_CONTROL_PERIOD, HEARTBEAT_QUEUE_CAPACITY, MAX_AXES,
    POSITION_QUEUE_CAPACITY, RECONNECT_INITIAL_DELAY, RECONNECT_JITTER, RECONNECT_MAX_DELAY,
    SPEED_QUEUE_CAPACITY,
};
use crate::frame::ChannelKind;
use crate::line::tuning::{AxisMechanics, GuardConfig, PlannerConfig, PlannerParams};

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT.as_millis() as u64
}

fn default_backoff_initial_ms() -> u64 {
    RECONNECT_INITIAL_DELAY.as_millis() as u64
}

fn default_backoff_max_ms() -> u64 {
    RECONNECT_MAX_DELAY.as_millis() as u64
}

fn default_jitter_ms() -> u64 {
    RECONNECT_JITTER.as_millis() as u64
}

fn default_control_period_ms() -> u64 {
    DEFAULT_CONTROL_PERIOD.as_millis() as u64
}

fn default_driver() -> String {
    "simulation".to_string()
}

fn default_gear_ratio() -> f64 {
    1.0
}

fn default_pulses_per_rev() -> u32 {
    10_000
}

// ─── Upstream ───────────────────────────────────────────────────────

/// Which side of the TCP connection this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    /// Dial the upstream host.
    #[default]
    Client,
    /// Bind and accept one upstream peer at a time.
    Server,
}

/// Upstream vision system connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Peer address (client) or bind address (server).
    pub host: String,
    pub speed_port: u16,
    pub position_port: u16,
    pub heartbeat_port: u16,
    #[serde(default)]
    pub role: TransportRole,
    /// Frames carry a trailing CRC16/MODBUS.
    #[serde(default)]
    pub validate_crc: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl UpstreamConfig {
    /// TCP port serving a channel.
    pub const fn port_for(&self, kind: ChannelKind) -> u16 {
        match kind {
            ChannelKind::Speed => self.speed_port,
            ChannelKind::Position => self.position_port,
            ChannelKind::Heartbeat => self.heartbeat_port,
        }
    }

    #[inline]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub const fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    #[inline]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[inline]
    pub const fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("upstream.host cannot be empty"));
        }
        let ports = [self.speed_port, self.position_port, self.heartbeat_port];
        if ports.contains(&0) {
            return Err(ConfigError::invalid("upstream ports must be non-zero"));
        }
        let unique: HashSet<u16> = ports.iter().copied().collect();
        if unique.len() != ports.len() {
            return Err(ConfigError::invalid(format!(
                "upstream ports must be distinct, got {ports:?}"
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid("upstream.connect_timeout_ms must be > 0"));
        }
        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::invalid(format!(
                "upstream backoff must satisfy 0 < initial ({}) <= max ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}

// ─── Hub ────────────────────────────────────────────────────────────

/// Per-subscriber queue capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub speed_capacity: usize,
    pub position_capacity: usize,
    pub heartbeat_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            speed_capacity: SPEED_QUEUE_CAPACITY,
            position_capacity: POSITION_QUEUE_CAPACITY,
            heartbeat_capacity: HEARTBEAT_QUEUE_CAPACITY,
        }
    }
}

impl HubConfig {
    pub const fn capacity_for(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Speed => self.speed_capacity,
            ChannelKind::Position => self.position_capacity,
            ChannelKind::Heartbeat => self.heartbeat_capacity,
        }
    }
}

// ─── Guard ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    pub sequence_window: usize,
    pub heartbeat_timeout_ms: u64,
    pub degrade_scale: f64,
}

impl Default for GuardSection {
    fn default() -> Self {
        let g = GuardConfig::default();
        Self {
            sequence_window: g.sequence_window,
            heartbeat_timeout_ms: g.heartbeat_timeout.as_millis() as u64,
            degrade_scale: g.degrade_scale,
        }
    }
}

// ─── Planner / Mechanics ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub min_rpm: f64,
    pub max_rpm: f64,
    pub smoothing_window: usize,
    pub max_accel_rpm_per_sec: f64,
    /// Ramp `dt`. Falls back to `mechanics.control_period_ms` when absent.
    pub sampling_period_ms: Option<u64>,
    pub hold_on_no_frame: bool,
}

impl Default for PlannerSection {
    fn default() -> Self {
        let p = PlannerParams::default();
        Self {
            min_rpm: p.min_rpm,
            max_rpm: p.max_rpm,
            smoothing_window: p.smoothing_window,
            max_accel_rpm_per_sec: p.max_accel_rpm_per_sec,
            sampling_period_ms: None,
            hold_on_no_frame: p.hold_on_no_frame,
        }
    }
}

/// System-wide belt limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MechanicsSection {
    pub max_belt_speed_mps: f64,
    #[serde(default)]
    pub min_belt_speed_mps: f64,
    #[serde(default)]
    pub max_accel_mps2: f64,
    #[serde(default)]
    pub max_jerk_mps3: f64,
    #[serde(default = "default_control_period_ms")]
    pub control_period_ms: u64,
}

impl Default for MechanicsSection {
    fn default() -> Self {
        Self {
            max_belt_speed_mps: 5.0,
            min_belt_speed_mps: 0.0,
            max_accel_mps2: 0.0,
            max_jerk_mps3: 0.0,
            control_period_ms: default_control_period_ms(),
        }
    }
}

// ─── Controller ─────────────────────────────────────────────────────

/// Motion controller template shared by every axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerTemplate {
    pub vendor: String,
    pub ip: String,
    #[serde(default)]
    pub card_no: u16,
    #[serde(default)]
    pub port_no: u16,
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f64,
    #[serde(default = "default_pulses_per_rev")]
    pub pulses_per_rev: u32,
    #[serde(default = "ControllerTemplate::default_max_rpm")]
    pub max_rpm: f64,
    #[serde(default = "ControllerTemplate::default_accel")]
    pub max_accel_rpm_per_sec: f64,
    #[serde(default = "ControllerTemplate::default_accel")]
    pub max_decel_rpm_per_sec: f64,
    /// Minimum spacing between two commands to the same drive.
    #[serde(default)]
    pub min_write_interval_ms: u64,
    #[serde(default = "ControllerTemplate::default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Registered drive factory name.
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ControllerTemplate {
    fn default_max_rpm() -> f64 {
        3000.0
    }

    fn default_accel() -> f64 {
        2000.0
    }

    fn default_command_timeout_ms() -> u64 {
        200
    }

    #[inline]
    pub const fn min_write_interval(&self) -> Duration {
        Duration::from_millis(self.min_write_interval_ms)
    }

    #[inline]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vendor.trim().is_empty() {
            return Err(ConfigError::invalid("controller.vendor cannot be empty"));
        }
        if self.ip.parse::<IpAddr>().is_err() {
            return Err(ConfigError::invalid(format!(
                "controller.ip is not an IP address: {}",
                self.ip
            )));
        }
        if !(self.max_rpm.is_finite() && self.max_rpm > 0.0) {
            return Err(ConfigError::invalid("controller.max_rpm must be > 0"));
        }
        if !(self.max_accel_rpm_per_sec > 0.0 && self.max_decel_rpm_per_sec > 0.0) {
            return Err(ConfigError::invalid(
                "controller acceleration and deceleration must be > 0",
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::invalid("controller.command_timeout_ms must be > 0"));
        }
        if self.driver.trim().is_empty() {
            return Err(ConfigError::invalid("controller.driver cannot be empty"));
        }
        Ok(())
    }
}

// ─── Grid / Axes ────────────────────────────────────────────────────

/// Physical arrangement of the main belts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub rows: u16,
    pub cols: u16,
}

impl GridConfig {
    #[inline]
    pub const fn cells(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// One `[[axes]]` entry. Order in the file is physical slot order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEntry {
    pub id: AxisId,
    pub role: AxisRole,
    pub diameter_m: f64,
    /// Overrides `controller.gear_ratio`.
    #[serde(default)]
    pub gear_ratio: Option<f64>,
    /// Overrides `controller.pulses_per_rev`.
    #[serde(default)]
    pub pulses_per_rev: Option<u32>,
}

// ─── LineConfig ─────────────────────────────────────────────────────

/// Root configuration loaded from `singu.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub shared: SharedConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub guard: GuardSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub mechanics: MechanicsSection,
    pub controller: ControllerTemplate,
    #[serde(default)]
    pub grid: Option<GridConfig>,
    #[serde(default)]
    pub axes: Vec<AxisEntry>,
}

impl LineConfig {
    /// Validate the line configuration.
    ///
    /// # Validation Rules
    /// 1. `[shared]`, `[upstream]` and `[controller]` sections are well-formed
    /// 2. 1 <= `axes.len()` <= MAX_AXES, ids unique, main axes before eject axes
    /// 3. `grid.rows × grid.cols` equals the main axis count when present
    /// 4. Hub capacities > 0
    /// 5. Guard, planner and mechanics values are in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.upstream.validate()?;
        self.controller.validate()?;

        if self.axes.len() > MAX_AXES {
            return Err(ConfigError::invalid(format!(
                "too many axes: {} (max {MAX_AXES})",
                self.axes.len()
            )));
        }
        let topology = self.topology()?;

        if let Some(grid) = self.grid {
            if grid.cells() != topology.main_count() {
                return Err(ConfigError::invalid(format!(
                    "grid {}x{} does not match {} main axes",
                    grid.rows,
                    grid.cols,
                    topology.main_count()
                )));
            }
        }

        for kind in ChannelKind::ALL {
            if self.hub.capacity_for(kind) == 0 {
                return Err(ConfigError::invalid(format!(
                    "hub capacity for {kind} must be > 0"
                )));
            }
        }

        self.guard_config().validate()?;
        self.planner_config().validate()?;
        self.planner_params().validate()?;
        Ok(())
    }

    /// Axis layout in file order.
    pub fn topology(&self) -> Result<ConveyorTopology, ConfigError> {
        let roles: Vec<(AxisId, AxisRole)> = self.axes.iter().map(|a| (a.id, a.role)).collect();
        ConveyorTopology::from_roles(&roles).map_err(|e| ConfigError::invalid(e.to_string()))
    }

    /// Mechanics of one entry, with controller defaults filled in.
    pub fn mechanics_for(&self, entry: &AxisEntry) -> AxisMechanics {
        AxisMechanics {
            diameter_m: entry.diameter_m,
            gear_ratio: entry.gear_ratio.unwrap_or(self.controller.gear_ratio),
            pulses_per_rev: entry.pulses_per_rev.unwrap_or(self.controller.pulses_per_rev),
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            axes: self.axes.iter().map(|a| self.mechanics_for(a)).collect(),
            max_belt_speed_mps: self.mechanics.max_belt_speed_mps,
            min_belt_speed_mps: self.mechanics.min_belt_speed_mps,
            max_accel_mps2: self.mechanics.max_accel_mps2,
            max_jerk_mps3: self.mechanics.max_jerk_mps3,
            control_period: Duration::from_millis(self.mechanics.control_period_ms),
        }
    }

    /// Planner params. `max_rpm` is capped by the controller template.
    pub fn planner_params(&self) -> PlannerParams {
        let sampling_ms = self
            .planner
            .sampling_period_ms
            .unwrap_or(self.mechanics.control_period_ms);
        PlannerParams {
            min_rpm: self.planner.min_rpm,
            max_rpm: self.planner.max_rpm.min(self.controller.max_rpm),
            smoothing_window: self.planner.smoothing_window,
            max_accel_rpm_per_sec: self.planner.max_accel_rpm_per_sec,
            sampling_period: Duration::from_millis(sampling_ms),
            hold_on_no_frame: self.planner.hold_on_no_frame,
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            sequence_window: self.guard.sequence_window,
            heartbeat_timeout: Duration::from_millis(self.guard.heartbeat_timeout_ms),
            degrade_scale: self.guard.degrade_scale,
        }
    }
}
