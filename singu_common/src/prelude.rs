//! Prelude module for common re-exports.
//!
//! ```rust
//! use singu_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};
pub use crate::line::{
    AxisMechanics, GuardConfig, LineConfig, PlannerConfig, PlannerParams, TransportRole,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_AXES, MAX_SEQUENCE_WINDOW};

// ─── Data Model ─────────────────────────────────────────────────────
pub use crate::axis::{AxisEvent, AxisId, AxisRole, AxisRpm, ConveyorTopology, TopologyError};
pub use crate::codec::{DecodeError, SpeedCodec};
pub use crate::frame::{ChannelKind, FrameCommand, SpeedSet, SpeedUnit};
pub use crate::safety::{ControlMode, SafetyIoEvent, SafetyIsolationState, SafetyTriggerKind};
