//! Simulated axis drive.
//!
//! Behaves like a vendor drive from the controller's point of view: it
//! honours the command gate, rejects speeds above its limit, reports
//! feedback after each accepted write, and can be faulted or disconnected
//! on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use singu_common::axis::{AxisId, AxisRpm};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::drive::{AxisDrive, DriveError, DriveEvent, DriveSpec};
use crate::gate::{CommandGate, GateDecision};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct SimState {
    connected: bool,
    fault: Option<String>,
    speed: AxisRpm,
    latency: Duration,
}

/// In-process drive.
#[derive(Debug)]
pub struct SimAxisDrive {
    spec: DriveSpec,
    gate: CommandGate,
    state: Mutex<SimState>,
    events: broadcast::Sender<DriveEvent>,
    commands: AtomicU64,
}

/// Factory registered as `"simulation"`.
pub fn create_drive(spec: DriveSpec) -> Result<Arc<dyn AxisDrive>, DriveError> {
    Ok(Arc::new(SimAxisDrive::from_spec(spec)))
}

impl SimAxisDrive {
    pub fn new(axis: AxisId) -> Self {
        Self::from_spec(DriveSpec::simulated(axis))
    }

    pub fn from_spec(spec: DriveSpec) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gate: CommandGate::new(spec.min_write_interval),
            spec,
            state: Mutex::new(SimState {
                connected: true,
                fault: None,
                speed: AxisRpm::ZERO,
                latency: Duration::ZERO,
            }),
            events,
            commands: AtomicU64::new(0),
        }
    }

    /// Delay every command by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    #[inline]
    pub fn spec(&self) -> &DriveSpec {
        &self.spec
    }

    /// Put the drive into a fault state and report it.
    pub fn inject_fault(&self, message: &str) {
        self.state.lock().fault = Some(message.to_string());
        warn!(axis = %self.spec.axis, message, "simulated drive fault");
        self.emit(DriveEvent::Faulted(message.to_string()));
    }

    pub fn clear_fault(&self) {
        self.state.lock().fault = None;
    }

    /// Drop the simulated link and report it.
    pub fn disconnect(&self, reason: &str) {
        self.state.lock().connected = false;
        self.gate.clear();
        self.emit(DriveEvent::Disconnected(reason.to_string()));
    }

    pub fn reconnect(&self) {
        self.state.lock().connected = true;
    }

    /// Report a missing vendor library, as a real driver would at bring-up.
    pub fn report_library_missing(&self, library: &str) {
        self.emit(DriveEvent::DriverNotLoaded {
            library: library.to_string(),
            message: "shared library not found".to_string(),
        });
    }

    /// Commands actually sent (after throttling and de-duplication).
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    pub fn current_speed(&self) -> AxisRpm {
        self.state.lock().speed
    }

    fn emit(&self, event: DriveEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn check_ready(&self) -> Result<Duration, DriveError> {
        let st = self.state.lock();
        if !st.connected {
            return Err(DriveError::Disconnected(self.spec.axis));
        }
        if let Some(message) = &st.fault {
            return Err(DriveError::Faulted {
                axis: self.spec.axis,
                message: message.clone(),
            });
        }
        Ok(st.latency)
    }
}

#[async_trait]
impl AxisDrive for SimAxisDrive {
    fn axis(&self) -> AxisId {
        self.spec.axis
    }

    async fn write_speed(&self, rpm: AxisRpm) -> Result<(), DriveError> {
        let latency = self.check_ready()?;
        if rpm.value().abs() > self.spec.max_rpm {
            return Err(DriveError::CommandFailed {
                axis: self.spec.axis,
                message: format!("{rpm} exceeds limit {:.0} rpm", self.spec.max_rpm),
            });
        }

        let permit = match self.gate.admit(rpm.value()).await {
            GateDecision::Send(permit) => permit,
            GateDecision::Duplicate => return Ok(()),
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        // Link state may have changed while waiting; the dropped permit
        // releases the value.
        self.check_ready()?;
        self.state.lock().speed = rpm;
        permit.commit();
        self.commands.fetch_add(1, Ordering::Relaxed);
        debug!(axis = %self.spec.axis, %rpm, "speed written");
        self.emit(DriveEvent::SpeedFeedback(rpm));
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriveError> {
        self.gate.clear();
        let latency = {
            let st = self.state.lock();
            if !st.connected {
                return Err(DriveError::Disconnected(self.spec.axis));
            }
            st.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().speed = AxisRpm::ZERO;
        self.commands.fetch_add(1, Ordering::Relaxed);
        self.emit(DriveEvent::SpeedFeedback(AxisRpm::ZERO));
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.check_ready().is_ok()
    }

    fn clear_last_command(&self) {
        self.gate.clear();
    }

    fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.events.subscribe()
    }
}
