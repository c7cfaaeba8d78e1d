//! # Singulation Line Control Unit
//!
//! Turns validated upstream frames into safe per-axis RPM targets.
//!
//! ## Stages
//!
//! 1. **FrameGuard**: sequence and heartbeat supervision, degrade scaling
//! 2. **SpeedPlanner**: unit conversion, clamping, hold, smoothing, ramp
//! 3. **SafetyIsolator**: Normal / Degraded / Isolated overlay that can
//!    override the pipeline at any point
//!
//! The realtime notifier boundary ([`notify`]) lets the isolator and the
//! line push state to an external dashboard without depending on it.

pub mod error;
pub mod guard;
pub mod notify;
pub mod planner;
pub mod safety;

pub use error::PlanError;
pub use guard::{DropReason, FrameGuard, GuardDecision};
pub use notify::{MemoryNotifier, NotifyError, NullNotifier, RealtimeNotifier, TracingNotifier};
pub use planner::{PlannerParamsHandle, PlannerStatus, SpeedPlanner};
pub use safety::{SafetyIsolator, SafetyStateChanged, SafetyTrigger};
