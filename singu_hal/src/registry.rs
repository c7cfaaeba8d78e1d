//! Drive registry.
//!
//! Maps the `[controller].driver` name to a [`DriveFactory`]. Built at
//! startup and handed to [`AxisController::from_config`](crate::AxisController::from_config);
//! no global state.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::drive::{AxisDrive, DriveError, DriveFactory, DriveSpec};
use crate::drivers;

pub struct DriveRegistry {
    factories: HashMap<&'static str, DriveFactory>,
}

impl DriveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in driver registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        drivers::register_builtin(&mut registry);
        registry
    }

    /// Register a driver factory. An existing registration under the same
    /// name is kept and `false` returned.
    pub fn register(&mut self, name: &'static str, factory: DriveFactory) -> bool {
        if self.factories.contains_key(name) {
            warn!(name, "drive driver already registered");
            return false;
        }
        self.factories.insert(name, factory);
        true
    }

    pub fn get_factory(&self, name: &str) -> Option<DriveFactory> {
        self.factories.get(name).copied()
    }

    /// Create a drive by driver name.
    ///
    /// # Errors
    /// `DriveError::DriverNotFound` if nothing is registered under `name`,
    /// otherwise whatever the factory returns.
    pub fn create(&self, name: &str, spec: DriveSpec) -> Result<Arc<dyn AxisDrive>, DriveError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DriveError::DriverNotFound(name.to_string()))?;
        factory(spec)
    }

    /// Registered driver names, sorted.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriveRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
