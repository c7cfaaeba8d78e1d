//! Physical safety I/O: e-stop, stop/start/reset buttons and the
//! remote/local selector, mapped onto the running line.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use singu_common::safety::{ControlMode, SafetyIoEvent, SafetyTriggerKind};
use tracing::{info, warn};

use crate::pipeline::LinePipeline;

/// Notifier channel for control mode changes.
pub const MODE_CHANNEL: &str = "mode";

pub struct SafetyIoBridge {
    pipeline: Arc<LinePipeline>,
    mode: Mutex<ControlMode>,
}

impl SafetyIoBridge {
    pub fn new(pipeline: Arc<LinePipeline>) -> Self {
        Self {
            pipeline,
            mode: Mutex::new(ControlMode::default()),
        }
    }

    /// Apply one I/O event.
    ///
    /// | Event                   | Action                                     |
    /// |-------------------------|--------------------------------------------|
    /// | `EmergencyStop`         | trip the isolator                          |
    /// | `StopRequested`         | pause the line and stop all axes           |
    /// | `StartRequested`        | resume the line                            |
    /// | `ResetRequested`        | reset isolation                            |
    /// | `RemoteLocalModeChanged`| record the mode, clear last speeds, notify |
    pub async fn handle(&self, event: SafetyIoEvent) {
        match event {
            SafetyIoEvent::EmergencyStop => {
                warn!("emergency stop pressed");
                self.pipeline
                    .isolator()
                    .trip(SafetyTriggerKind::EmergencyStop, "emergency stop pressed");
            }
            SafetyIoEvent::StopRequested => {
                info!("stop requested");
                self.pipeline.pause().await;
            }
            SafetyIoEvent::StartRequested => {
                info!("start requested");
                self.pipeline.resume();
            }
            SafetyIoEvent::ResetRequested => {
                let cancel = self.pipeline.cancellation();
                let reset = self
                    .pipeline
                    .isolator()
                    .reset_isolation("operator reset", &cancel);
                info!(reset, "reset requested");
            }
            SafetyIoEvent::RemoteLocalModeChanged(mode) => {
                let previous = std::mem::replace(&mut *self.mode.lock(), mode);
                self.pipeline.controller().reset_last_speeds();
                info!(?previous, ?mode, "control mode changed");
                let payload = json!({ "previous": previous, "mode": mode });
                if let Err(e) = self.pipeline.notifier().publish(MODE_CHANNEL, payload) {
                    warn!(error = %e, "mode change not published");
                }
            }
        }
    }

    pub fn mode(&self) -> ControlMode {
        *self.mode.lock()
    }

    pub fn pipeline(&self) -> &Arc<LinePipeline> {
        &self.pipeline
    }
}
