//! # Singulation Line HAL
//!
//! Per-axis drive abstraction and the controller that fans planned speeds
//! out to every drive.
//!
//! - [`drive`]: the [`AxisDrive`] trait, drive errors and events
//! - [`gate`]: command throttling and de-duplication
//! - [`bus`]: vendor bus/library bring-up
//! - [`drivers`]: built-in drive implementations (simulation)
//! - [`registry`]: name → factory lookup, constructor-injected
//! - [`aggregator`]: merges drive events into one stream
//! - [`controller`]: concurrent, time-bounded command fan-out
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement [`AxisDrive`]
//! 3. Register its factory in [`drivers::register_builtin`]

pub mod aggregator;
pub mod bus;
pub mod controller;
pub mod drive;
pub mod drivers;
pub mod gate;
pub mod registry;

pub use aggregator::AxisEventAggregator;
pub use bus::{BusAdapter, SimBus};
pub use controller::{AxisController, ApplyReport};
pub use drive::{AxisDrive, DriveError, DriveEvent, DriveFactory, DriveSpec};
pub use drivers::simulation::SimAxisDrive;
pub use gate::{CommandGate, GateDecision, GatePermit};
pub use registry::DriveRegistry;
