//! Drive trait, errors and events.
//!
//! One [`AxisDrive`] per physical axis. Drives never raise faults as
//! errors to the pipeline: command failures come back as [`DriveError`]
//! and are turned into [`AxisEvent`]s by the controller, asynchronous
//! conditions are pushed through [`AxisDrive::subscribe`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use singu_common::axis::{AxisEvent, AxisId, AxisRpm};
use singu_common::line::{AxisMechanics, ControllerTemplate};
use thiserror::Error;
use tokio::sync::broadcast;

/// Error types for drive operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriveError {
    /// Drive rejected or failed a command.
    #[error("{axis}: command failed: {message}")]
    CommandFailed { axis: AxisId, message: String },

    /// Command did not complete in time.
    #[error("{axis}: command timed out after {after:?}")]
    Timeout { axis: AxisId, after: Duration },

    /// Link to the drive is down.
    #[error("{0}: disconnected")]
    Disconnected(AxisId),

    /// Vendor library could not be loaded.
    #[error("vendor library '{library}' not loaded: {message}")]
    LibraryNotLoaded { library: String, message: String },

    /// Drive is in a fault state.
    #[error("{axis}: faulted: {message}")]
    Faulted { axis: AxisId, message: String },

    /// No factory registered under this name.
    #[error("drive driver not found: {0}")]
    DriverNotFound(String),

    /// Controller wiring does not match the topology.
    #[error("drive configuration error: {0}")]
    InvalidConfig(String),
}

/// Asynchronous conditions reported by a drive.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveEvent {
    Faulted(String),
    Disconnected(String),
    DriverNotLoaded { library: String, message: String },
    SpeedFeedback(AxisRpm),
}

impl DriveEvent {
    /// Tag the event with its axis.
    pub fn into_axis_event(self, axis: AxisId) -> AxisEvent {
        match self {
            Self::Faulted(error) => AxisEvent::Faulted { axis, error },
            Self::Disconnected(reason) => AxisEvent::Disconnected { axis, reason },
            Self::DriverNotLoaded { library, message } => {
                AxisEvent::DriverNotLoaded { library, message }
            }
            Self::SpeedFeedback(rpm) => AxisEvent::SpeedFeedback { axis, rpm },
        }
    }
}

/// Construction parameters for one drive.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveSpec {
    pub axis: AxisId,
    pub vendor: String,
    pub ip: String,
    pub card_no: u16,
    pub port_no: u16,
    pub mechanics: AxisMechanics,
    pub max_rpm: f64,
    pub max_accel_rpm_per_sec: f64,
    pub max_decel_rpm_per_sec: f64,
    pub min_write_interval: Duration,
}

impl DriveSpec {
    /// Spec for `axis` from the controller template.
    pub fn from_template(axis: AxisId, mechanics: AxisMechanics, template: &ControllerTemplate) -> Self {
        Self {
            axis,
            vendor: template.vendor.clone(),
            ip: template.ip.clone(),
            card_no: template.card_no,
            port_no: template.port_no,
            mechanics,
            max_rpm: template.max_rpm,
            max_accel_rpm_per_sec: template.max_accel_rpm_per_sec,
            max_decel_rpm_per_sec: template.max_decel_rpm_per_sec,
            min_write_interval: template.min_write_interval(),
        }
    }

    /// Minimal spec for simulators and tests.
    pub fn simulated(axis: AxisId) -> Self {
        Self {
            axis,
            vendor: "simulation".to_string(),
            ip: "127.0.0.1".to_string(),
            card_no: 0,
            port_no: 0,
            mechanics: AxisMechanics {
                diameter_m: 0.05,
                gear_ratio: 1.0,
                pulses_per_rev: 10_000,
            },
            max_rpm: 3000.0,
            max_accel_rpm_per_sec: 2000.0,
            max_decel_rpm_per_sec: 2000.0,
            min_write_interval: Duration::ZERO,
        }
    }
}

/// Interface implemented by every drive backend.
///
/// # Contract
///
/// | Operation            | Errors            | Notes                              |
/// |----------------------|-------------------|------------------------------------|
/// | `write_speed`        | `DriveError`      | may be throttled / de-duplicated   |
/// | `stop`               | `DriveError`      | forgets the last command           |
/// | `ping`               | never             | `false` when unreachable / faulted |
/// | `clear_last_command` | never             | next write is always sent          |
#[async_trait]
pub trait AxisDrive: Send + Sync {
    fn axis(&self) -> AxisId;

    async fn write_speed(&self, rpm: AxisRpm) -> Result<(), DriveError>;

    async fn stop(&self) -> Result<(), DriveError>;

    async fn ping(&self) -> bool;

    fn clear_last_command(&self);

    fn subscribe(&self) -> broadcast::Receiver<DriveEvent>;
}

/// Factory function type for creating drive instances.
pub type DriveFactory = fn(DriveSpec) -> Result<Arc<dyn AxisDrive>, DriveError>;
