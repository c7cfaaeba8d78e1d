//! Axis identifiers, conveyor topology and axis events.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::MAX_AXES;

// ─── Identifiers ────────────────────────────────────────────────────

/// Physical axis identifier as configured on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisId(pub u16);

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "axis-{}", self.0)
    }
}

/// Function of an axis within the singulation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisRole {
    /// Primary separation belt.
    Main,
    /// Diverter / rejection belt.
    Eject,
}

// ─── AxisRpm ────────────────────────────────────────────────────────

/// Target speed for one axis slot, signed, in RPM.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisRpm(pub f64);

impl AxisRpm {
    pub const ZERO: AxisRpm = AxisRpm(0.0);

    #[inline]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for AxisRpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} rpm", self.0)
    }
}

// ─── Topology ───────────────────────────────────────────────────────

/// Topology construction error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("topology has no axes")]
    Empty,

    #[error("too many axes: {0} (max {max})", max = MAX_AXES)]
    TooManyAxes(usize),

    #[error("duplicate axis id {0}")]
    DuplicateAxis(AxisId),

    #[error("main axis {0} listed after an eject axis")]
    MainAfterEject(AxisId),
}

/// Ordered physical axis layout.
///
/// Slots `0..main_count` hold main axes, the remaining slots eject axes.
/// Planner output and controller drives align 1:1 with this ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConveyorTopology {
    axes: Vec<AxisId>,
    main_count: usize,
}

impl ConveyorTopology {
    /// Build a topology from `(id, role)` pairs in physical order.
    pub fn from_roles(axes: &[(AxisId, AxisRole)]) -> Result<Self, TopologyError> {
        if axes.is_empty() {
            return Err(TopologyError::Empty);
        }
        if axes.len() > MAX_AXES {
            return Err(TopologyError::TooManyAxes(axes.len()));
        }

        let mut seen = HashSet::with_capacity(axes.len());
        let mut main_count = 0;
        let mut eject_seen = false;
        for (id, role) in axes {
            if !seen.insert(*id) {
                return Err(TopologyError::DuplicateAxis(*id));
            }
            match role {
                AxisRole::Main if eject_seen => return Err(TopologyError::MainAfterEject(*id)),
                AxisRole::Main => main_count += 1,
                AxisRole::Eject => eject_seen = true,
            }
        }

        Ok(Self {
            axes: axes.iter().map(|(id, _)| *id).collect(),
            main_count,
        })
    }

    /// Topology with `main` main axes followed by `eject` eject axes, ids from 1.
    pub fn sequential(main: usize, eject: usize) -> Result<Self, TopologyError> {
        let roles: Vec<(AxisId, AxisRole)> = (0..main + eject)
            .map(|i| {
                let role = if i < main { AxisRole::Main } else { AxisRole::Eject };
                (AxisId(i as u16 + 1), role)
            })
            .collect();
        Self::from_roles(&roles)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    #[inline]
    pub fn main_count(&self) -> usize {
        self.main_count
    }

    #[inline]
    pub fn eject_count(&self) -> usize {
        self.axes.len() - self.main_count
    }

    #[inline]
    pub fn axes(&self) -> &[AxisId] {
        &self.axes
    }

    /// Slot index of an axis, if present.
    pub fn slot_of(&self, axis: AxisId) -> Option<usize> {
        self.axes.iter().position(|a| *a == axis)
    }

    /// Role of the axis at `slot`.
    pub fn role_at(&self, slot: usize) -> Option<AxisRole> {
        if slot >= self.axes.len() {
            None
        } else if slot < self.main_count {
            Some(AxisRole::Main)
        } else {
            Some(AxisRole::Eject)
        }
    }
}

// ─── Axis Events ────────────────────────────────────────────────────

/// Fault and telemetry events produced by drives and the controller.
///
/// Events are values, never raised as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisEvent {
    /// A drive reported a fault or a command to it failed.
    Faulted { axis: AxisId, error: String },
    /// A drive lost its connection.
    Disconnected { axis: AxisId, reason: String },
    /// Vendor library could not be loaded.
    DriverNotLoaded { library: String, message: String },
    /// The controller as a whole failed (e.g. every axis rejected a command).
    ControllerFaulted { reason: String },
    /// Speed feedback relayed from a drive.
    SpeedFeedback { axis: AxisId, rpm: AxisRpm },
}

impl AxisEvent {
    /// Whether the event represents a fault (as opposed to telemetry).
    #[inline]
    pub const fn is_fault(&self) -> bool {
        !matches!(self, Self::SpeedFeedback { .. })
    }

    /// Axis the event refers to, if axis-scoped.
    pub const fn axis(&self) -> Option<AxisId> {
        match self {
            Self::Faulted { axis, .. }
            | Self::Disconnected { axis, .. }
            | Self::SpeedFeedback { axis, .. } => Some(*axis),
            Self::DriverNotLoaded { .. } | Self::ControllerFaulted { .. } => None,
        }
    }
}
