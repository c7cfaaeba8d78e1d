//! # Singulation Line
//!
//! Wires the upstream transports, frame hub, frame guard, speed planner,
//! safety isolator and axis controller into one running line.
//!
//! ```text
//! upstream TCP ─► Transport ─► FrameHub ─┬─► speed worker ─► guard ─► planner ─► AxisController
//!                                        ├─► heartbeat worker ─► guard
//!                                        └─► position worker ─► notifier
//! SafetyIsolator ─► safety worker ─► stop_all / reset
//! AxisEventAggregator ─► event pump ─► notifier / trip
//! ```

pub mod error;
pub mod pipeline;
pub mod safety_io;

pub use error::PipelineError;
pub use pipeline::{LinePipeline, PipelineCounters};
pub use safety_io::SafetyIoBridge;
