//! Built-in drive implementations.
//!
//! - [`simulation`] - in-process drive for development and testing

pub mod simulation;

use crate::registry::DriveRegistry;

/// Register every built-in driver.
pub fn register_builtin(registry: &mut DriveRegistry) {
    registry.register("simulation", simulation::create_drive);

    // Vendor drivers are registered here as they are added.
}
