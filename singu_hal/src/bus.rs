//! Motion-card bus bring-up.
//!
//! Real backends load a vendor library and open a card/port pair before
//! any drive can be commanded. [`SimBus`] stands in for them and can
//! pretend the library is missing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::drive::DriveError;

#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Name of the vendor library backing this bus.
    fn library(&self) -> &str;

    async fn open(&self, card_no: u16, port_no: u16) -> Result<(), DriveError>;

    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// In-process bus for simulation.
#[derive(Debug)]
pub struct SimBus {
    library: String,
    library_present: bool,
    open: AtomicBool,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            library: "simulation".to_string(),
            library_present: true,
            open: AtomicBool::new(false),
        }
    }

    /// Bus whose vendor library cannot be loaded.
    pub fn missing_library(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            library_present: false,
            open: AtomicBool::new(false),
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusAdapter for SimBus {
    fn library(&self) -> &str {
        &self.library
    }

    async fn open(&self, card_no: u16, port_no: u16) -> Result<(), DriveError> {
        if !self.library_present {
            return Err(DriveError::LibraryNotLoaded {
                library: self.library.clone(),
                message: "shared library not found".to_string(),
            });
        }
        self.open.store(true, Ordering::Release);
        info!(library = %self.library, card_no, port_no, "bus opened");
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            info!(library = %self.library, "bus closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
