//! Axis controller: fans one planned speed vector out to every drive.
//!
//! Commands to all axes run concurrently in a `JoinSet`, each bounded by
//! the command timeout. Failures never surface as `Err`: each failed axis
//! becomes an [`AxisEvent::Faulted`] on the aggregator, and a command
//! rejected by every axis adds an [`AxisEvent::ControllerFaulted`].

use std::sync::Arc;
use std::time::Duration;

use singu_common::axis::{AxisEvent, AxisId, AxisRpm, ConveyorTopology};
use singu_common::frame::{SpeedSet, SpeedUnit};
use singu_common::line::{ControllerTemplate, LineConfig};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::aggregator::AxisEventAggregator;
use crate::bus::BusAdapter;
use crate::drive::{AxisDrive, DriveError, DriveSpec};
use crate::registry::DriveRegistry;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Axes whose command failed or timed out.
    pub failed: Vec<AxisId>,
}

impl ApplyReport {
    #[inline]
    pub fn all_succeeded(&self) -> bool {
        self.attempted > 0 && self.failed.is_empty()
    }

    #[inline]
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }
}

pub struct AxisController {
    topology: ConveyorTopology,
    drives: Vec<Arc<dyn AxisDrive>>,
    bus: Arc<dyn BusAdapter>,
    events: Arc<AxisEventAggregator>,
    command_timeout: Duration,
    card_no: u16,
    port_no: u16,
}

impl AxisController {
    /// Wire drives to slots. `drives[i]` must serve `topology.axes()[i]`.
    pub fn new(
        topology: ConveyorTopology,
        drives: Vec<Arc<dyn AxisDrive>>,
        bus: Arc<dyn BusAdapter>,
        events: Arc<AxisEventAggregator>,
        template: &ControllerTemplate,
    ) -> Result<Self, DriveError> {
        if drives.len() != topology.len() {
            return Err(DriveError::InvalidConfig(format!(
                "{} drives for {} axes",
                drives.len(),
                topology.len()
            )));
        }
        for (slot, (drive, expected)) in drives.iter().zip(topology.axes()).enumerate() {
            if drive.axis() != *expected {
                return Err(DriveError::InvalidConfig(format!(
                    "slot {slot}: drive serves {}, topology expects {expected}",
                    drive.axis()
                )));
            }
        }
        Ok(Self {
            topology,
            drives,
            bus,
            events,
            command_timeout: template.command_timeout(),
            card_no: template.card_no,
            port_no: template.port_no,
        })
    }

    /// Build drives for every configured axis through `registry`.
    pub fn from_config(
        config: &LineConfig,
        registry: &DriveRegistry,
        bus: Arc<dyn BusAdapter>,
        events: Arc<AxisEventAggregator>,
    ) -> Result<Self, DriveError> {
        let topology = config
            .topology()
            .map_err(|e| DriveError::InvalidConfig(e.to_string()))?;
        let template = &config.controller;

        let drives = config
            .axes
            .iter()
            .map(|entry| {
                let spec = DriveSpec::from_template(entry.id, config.mechanics_for(entry), template);
                registry.create(&template.driver, spec)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(topology, drives, bus, events, template)
    }

    /// Open the bus and start relaying drive events.
    ///
    /// A missing vendor library is reported as `DriverNotLoaded`; any other
    /// bus failure as `ControllerFaulted`. The error is also returned.
    pub async fn initialize(&self) -> Result<(), DriveError> {
        if let Err(e) = self.bus.open(self.card_no, self.port_no).await {
            match &e {
                DriveError::LibraryNotLoaded { library, message } => {
                    error!(library, message, "vendor library not loaded");
                    self.events.report(AxisEvent::DriverNotLoaded {
                        library: library.clone(),
                        message: message.clone(),
                    });
                }
                other => {
                    error!(error = %other, "bus open failed");
                    self.events.report(AxisEvent::ControllerFaulted {
                        reason: other.to_string(),
                    });
                }
            }
            return Err(e);
        }

        for drive in &self.drives {
            self.events.attach(drive);
        }
        info!(
            library = self.bus.library(),
            axes = self.drives.len(),
            "axis controller initialized"
        );
        Ok(())
    }

    /// Map a speed set onto slots (main first, then eject) and apply it.
    ///
    /// Only RPM sets are accepted; linear sets must go through the planner.
    pub async fn apply_speed_set(&self, set: &SpeedSet) -> ApplyReport {
        if set.unit() != SpeedUnit::Rpm {
            self.controller_fault(format!(
                "speed set {} is linear; controller expects rpm",
                set.sequence()
            ));
            return ApplyReport::default();
        }
        if set.main_speeds().len() != self.topology.main_count()
            || set.eject_speeds().len() != self.topology.eject_count()
        {
            self.controller_fault(format!(
                "speed set {} has {}+{} axes, topology {}+{}",
                set.sequence(),
                set.main_speeds().len(),
                set.eject_speeds().len(),
                self.topology.main_count(),
                self.topology.eject_count()
            ));
            return ApplyReport::default();
        }
        let rpm: Vec<AxisRpm> = set.iter().map(AxisRpm).collect();
        self.apply_rpm(&rpm).await
    }

    /// Write `rpm[i]` to the drive in slot `i`, all concurrently.
    pub async fn apply_rpm(&self, rpm: &[AxisRpm]) -> ApplyReport {
        if rpm.len() != self.drives.len() {
            self.controller_fault(format!(
                "{} targets for {} axes",
                rpm.len(),
                self.drives.len()
            ));
            return ApplyReport::default();
        }

        let mut tasks = JoinSet::new();
        for (drive, target) in self.drives.iter().zip(rpm) {
            let drive = Arc::clone(drive);
            let target = *target;
            let limit = self.command_timeout;
            tasks.spawn(async move {
                let axis = drive.axis();
                let result = match timeout(limit, drive.write_speed(target)).await {
                    Ok(r) => r,
                    Err(_) => Err(DriveError::Timeout { axis, after: limit }),
                };
                (axis, result)
            });
        }
        let report = self.collect(tasks, "write_speed").await;
        debug!(succeeded = report.succeeded, failed = report.failed.len(), "speeds applied");
        report
    }

    /// Stop every drive.
    pub async fn stop_all(&self) -> ApplyReport {
        let mut tasks = JoinSet::new();
        for drive in &self.drives {
            let drive = Arc::clone(drive);
            let limit = self.command_timeout;
            tasks.spawn(async move {
                let axis = drive.axis();
                let result = match timeout(limit, drive.stop()).await {
                    Ok(r) => r,
                    Err(_) => Err(DriveError::Timeout { axis, after: limit }),
                };
                (axis, result)
            });
        }
        let report = self.collect(tasks, "stop").await;
        info!(succeeded = report.succeeded, failed = report.failed.len(), "all axes stopped");
        report
    }

    /// Ping every drive, in slot order. A ping that times out counts as
    /// unreachable.
    pub async fn ping_all(&self) -> Vec<(AxisId, bool)> {
        let mut tasks = JoinSet::new();
        for (slot, drive) in self.drives.iter().enumerate() {
            let drive = Arc::clone(drive);
            let limit = self.command_timeout;
            tasks.spawn(async move {
                let alive = timeout(limit, drive.ping()).await.unwrap_or(false);
                (slot, drive.axis(), alive)
            });
        }

        let mut results: Vec<(usize, AxisId, bool)> = Vec::with_capacity(self.drives.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => warn!(error = %e, "ping task failed"),
            }
        }
        results.sort_by_key(|(slot, _, _)| *slot);
        results.into_iter().map(|(_, axis, alive)| (axis, alive)).collect()
    }

    /// Forget every drive's last command so the next write always goes out.
    pub fn reset_last_speeds(&self) {
        for drive in &self.drives {
            drive.clear_last_command();
        }
        debug!("last speeds cleared");
    }

    /// Stop drives, stop relays and close the bus.
    pub async fn shutdown(&self) {
        self.stop_all().await;
        self.events.detach_all();
        self.bus.close().await;
    }

    #[inline]
    pub fn topology(&self) -> &ConveyorTopology {
        &self.topology
    }

    #[inline]
    pub fn drives(&self) -> &[Arc<dyn AxisDrive>] {
        &self.drives
    }

    #[inline]
    pub fn events(&self) -> &Arc<AxisEventAggregator> {
        &self.events
    }

    #[inline]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    async fn collect(
        &self,
        mut tasks: JoinSet<(AxisId, Result<(), DriveError>)>,
        operation: &'static str,
    ) -> ApplyReport {
        let mut report = ApplyReport {
            attempted: tasks.len(),
            ..ApplyReport::default()
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((axis, Err(e))) => {
                    warn!(%axis, operation, error = %e, "drive command failed");
                    self.events.report(AxisEvent::Faulted {
                        axis,
                        error: e.to_string(),
                    });
                    report.failed.push(axis);
                }
                Err(e) => warn!(operation, error = %e, "drive task failed"),
            }
        }
        report.failed.sort_unstable();

        if report.all_failed() {
            self.controller_fault(format!(
                "{operation} rejected by all {} axes",
                report.attempted
            ));
        }
        report
    }

    fn controller_fault(&self, reason: String) {
        error!(%reason, "axis controller fault");
        self.events.report(AxisEvent::ControllerFaulted { reason });
    }
}
