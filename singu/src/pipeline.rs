//! Line pipeline: the long-running workers between the hub, the guard,
//! the planner, the isolator and the axis controller.
//!
//! # Workers
//!
//! | Worker             | Input                         | Effect                                        |
//! |--------------------|-------------------------------|-----------------------------------------------|
//! | speed              | hub `Speed`                   | reassemble → decode → guard → gate → plan → apply |
//! | heartbeat          | hub `Heartbeat`               | `guard.record_heartbeat()`                    |
//! | heartbeat watchdog | every `T/2`                   | degrade on stale heartbeat, recover when back |
//! | safety             | isolator change stream        | stop all on Isolated, reset on Normal         |
//! | transport (×3)     | transport events              | degrade on speed link loss, recover on link   |
//! | position           | hub `Position`                | reassembled, decoded frames → notifier        |
//! | event pump         | aggregated axis events        | log, notify, trip on commissioning failure    |
//!
//! Every worker selects on one shared `CancellationToken`;
//! [`LinePipeline::shutdown`] cancels it and joins them all.
//!
//! The planner starts again from standstill after every stop it did not
//! command itself: a pause or an isolation. The speed worker compares a
//! `ResetEpoch` before planning each frame, so a frame that arrives right
//! after `resume()` or `reset_isolation()` never plans from the speeds the
//! line had before it stopped.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use singu_common::axis::{AxisEvent, ConveyorTopology};
use singu_common::codec::SpeedCodec;
use singu_common::codec::DecodeError;
use singu_common::frame::{ChannelKind, FrameCommand};
use singu_common::line::LineConfig;
use singu_common::safety::{SafetyIsolationState, SafetyTriggerKind};
use singu_control_unit::{
    FrameGuard, PlannerParamsHandle, RealtimeNotifier, SafetyIsolator, SafetyStateChanged,
    SpeedPlanner,
};
use singu_hal::AxisController;
use singu_link::{
    BinarySpeedCodec, FrameAssembler, FrameHub, FrameReceiver, Transport, TransportConfig,
    TransportEvent, TransportState, Unsubscribe,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::PipelineError;

/// Notifier channel for decoded position frames.
pub const POSITION_CHANNEL: &str = "position";
/// Notifier channel for axis events.
pub const AXIS_CHANNEL: &str = "axis";
/// Notifier channel for upstream link state.
pub const LINK_CHANNEL: &str = "link";

// ─── Counters ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    decoded: AtomicU64,
    decode_errors: AtomicU64,
    guard_dropped: AtomicU64,
    degraded: AtomicU64,
    applied: AtomicU64,
    skipped_isolated: AtomicU64,
    skipped_paused: AtomicU64,
    plan_errors: AtomicU64,
}

/// Snapshot of the speed path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    pub decoded: u64,
    pub decode_errors: u64,
    pub guard_dropped: u64,
    /// Applied frames that were scaled by the degrade scale.
    pub degraded: u64,
    pub applied: u64,
    pub skipped_isolated: u64,
    pub skipped_paused: u64,
    pub plan_errors: u64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> PipelineCounters {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineCounters {
            decoded: get(&self.decoded),
            decode_errors: get(&self.decode_errors),
            guard_dropped: get(&self.guard_dropped),
            degraded: get(&self.degraded),
            applied: get(&self.applied),
            skipped_isolated: get(&self.skipped_isolated),
            skipped_paused: get(&self.skipped_paused),
            plan_errors: get(&self.plan_errors),
        }
    }
}

// ─── Shared state ───────────────────────────────────────────────────

/// Pause and isolation counts. Any change means the line stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResetEpoch {
    pauses: u64,
    isolations: u64,
}

struct Shared {
    topology: ConveyorTopology,
    guard: FrameGuard,
    codec: Arc<dyn SpeedCodec>,
    controller: Arc<AxisController>,
    isolator: Arc<SafetyIsolator>,
    notifier: Arc<dyn RealtimeNotifier>,
    paused: AtomicBool,
    /// Bumped by every pause.
    pauses: AtomicU64,
    /// Active reasons for being Degraded, raised by this pipeline.
    degrade_causes: Mutex<HashSet<SafetyTriggerKind>>,
    counters: Counters,
}

impl Shared {
    /// Record `kind` as a degrade cause and ask the isolator to degrade.
    fn raise_degrade(&self, kind: SafetyTriggerKind, reason: &str) {
        let newly_raised = self.degrade_causes.lock().insert(kind);
        if newly_raised || self.isolator.state() == SafetyIsolationState::Normal {
            self.isolator.enter_degraded(kind, reason);
        }
    }

    /// Clear `kind`; recover once no cause remains.
    fn clear_degrade(&self, kind: SafetyTriggerKind, reason: &str) {
        let remaining = {
            let mut causes = self.degrade_causes.lock();
            if !causes.remove(&kind) {
                return;
            }
            causes.len()
        };
        if remaining == 0 && self.isolator.state() == SafetyIsolationState::Degraded {
            self.isolator.recover_from_degraded(reason);
        }
    }

    fn publish(&self, channel: &str, payload: serde_json::Value) {
        if let Err(e) = self.notifier.publish(channel, payload) {
            debug!(channel, error = %e, "realtime push failed");
        }
    }

    fn reset_epoch(&self) -> ResetEpoch {
        ResetEpoch {
            pauses: self.pauses.load(Ordering::Acquire),
            isolations: self.isolator.isolation_count(),
        }
    }

    fn speed_decode_failed(&self, error: &DecodeError, len: usize) {
        bump(&self.counters.decode_errors);
        warn!(%error, len, "speed frame dropped: decode failed");
    }

    async fn process_speed_frame(
        &self,
        planner: &mut SpeedPlanner,
        seen: &mut ResetEpoch,
        bytes: &[u8],
    ) {
        let set = match self.codec.try_decode_speed(bytes) {
            Ok(set) => set,
            Err(e) => {
                self.speed_decode_failed(&e, bytes.len());
                return;
            }
        };
        bump(&self.counters.decoded);

        let decision = self.guard.evaluate(set);
        let (reason, degraded_applied) = (decision.reason, decision.degraded_applied);
        let Some(mut set) = decision.output else {
            bump(&self.counters.guard_dropped);
            debug!(?reason, "speed frame dropped by guard");
            return;
        };

        let epoch = self.reset_epoch();
        if epoch != *seen {
            debug!(?epoch, "line stopped since last frame, planner reset");
            planner.reset();
            *seen = epoch;
        }

        let safety = self.isolator.state();
        if safety == SafetyIsolationState::Isolated {
            bump(&self.counters.skipped_isolated);
            trace!(sequence = set.sequence(), "frame skipped: line isolated");
            return;
        }
        if self.paused.load(Ordering::Acquire) {
            bump(&self.counters.skipped_paused);
            trace!(sequence = set.sequence(), "frame skipped: line paused");
            return;
        }

        if safety == SafetyIsolationState::Degraded && !degraded_applied {
            set = set.scaled(self.guard.config().degrade_scale);
        }
        if safety == SafetyIsolationState::Degraded || degraded_applied {
            bump(&self.counters.degraded);
        }

        let targets = match planner.plan(&self.topology, &set) {
            Ok(targets) => targets,
            Err(e) => {
                bump(&self.counters.plan_errors);
                warn!(sequence = set.sequence(), error = %e, "frame not planned");
                return;
            }
        };
        let report = self.controller.apply_rpm(targets).await;
        bump(&self.counters.applied);
        trace!(
            sequence = set.sequence(),
            status = ?planner.status(),
            succeeded = report.succeeded,
            "frame applied"
        );

        // A trip or pause that landed while the writes were in flight must win.
        if self.isolator.state() == SafetyIsolationState::Isolated
            || self.paused.load(Ordering::Acquire)
        {
            self.controller.stop_all().await;
        }
    }

    async fn on_safety_change(&self, previous: SafetyIsolationState, current: SafetyIsolationState) {
        match current {
            SafetyIsolationState::Isolated => {
                warn!(from = %previous, "line isolated, stopping all axes");
                self.controller.stop_all().await;
            }
            SafetyIsolationState::Normal => self.controller.reset_last_speeds(),
            SafetyIsolationState::Degraded => {}
        }
    }

    fn on_speed_link(&self, state: TransportState) {
        if state.is_link_lost() {
            self.raise_degrade(SafetyTriggerKind::Disconnect, "speed link lost");
        } else if state == TransportState::Connected {
            self.guard.reset_sequence();
            self.clear_degrade(SafetyTriggerKind::Disconnect, "speed link restored");
        }
    }

    fn on_axis_event(&self, event: &AxisEvent) {
        match event {
            AxisEvent::Faulted { axis, error } => warn!(%axis, error, "axis fault"),
            AxisEvent::Disconnected { axis, reason } => warn!(%axis, reason, "axis disconnected"),
            AxisEvent::DriverNotLoaded { library, message } => {
                error!(library, message, "drive library not loaded");
                self.isolator.trip(
                    SafetyTriggerKind::CommissioningFailure,
                    &format!("drive library {library} not loaded: {message}"),
                );
            }
            AxisEvent::ControllerFaulted { reason } => {
                error!(reason, "axis controller faulted");
                self.isolator
                    .trip(SafetyTriggerKind::CommissioningFailure, reason);
            }
            AxisEvent::SpeedFeedback { axis, rpm } => trace!(%axis, %rpm, "speed feedback"),
        }
        match serde_json::to_value(event) {
            Ok(payload) => self.publish(AXIS_CHANNEL, payload),
            Err(e) => warn!(error = %e, "axis event not serialisable"),
        }
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────

pub struct LinePipeline {
    shared: Arc<Shared>,
    params: PlannerParamsHandle,
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    transports: Vec<Arc<Transport>>,
    stopped: AtomicBool,
}

impl LinePipeline {
    /// Start the line with one upstream transport per channel, built from
    /// `[upstream]`.
    pub fn start(
        config: &LineConfig,
        hub: FrameHub,
        controller: Arc<AxisController>,
        isolator: Arc<SafetyIsolator>,
        notifier: Arc<dyn RealtimeNotifier>,
    ) -> Result<Self, PipelineError> {
        let transports = ChannelKind::ALL
            .iter()
            .map(|kind| {
                Transport::with_hub(TransportConfig::from_upstream(&config.upstream, *kind), hub.clone())
            })
            .collect();
        Self::start_with_transports(config, hub, transports, controller, isolator, notifier)
    }

    /// Start the line with caller-supplied transports (possibly none, when
    /// frames are published to `hub` directly).
    pub fn start_with_transports(
        config: &LineConfig,
        hub: FrameHub,
        transports: Vec<Transport>,
        controller: Arc<AxisController>,
        isolator: Arc<SafetyIsolator>,
        notifier: Arc<dyn RealtimeNotifier>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let topology = config.topology()?;
        if controller.topology() != &topology {
            return Err(PipelineError::TopologyMismatch {
                controller: controller.topology().len(),
                config: topology.len(),
            });
        }

        let guard_config = config.guard_config();
        let guard = FrameGuard::new(guard_config)?;
        let planner = SpeedPlanner::new(config.planner_config(), config.planner_params())?;
        let params = planner.params_handle();
        let cancel = CancellationToken::new();

        let axis_events = controller.events().take_stream();
        let safety_changes = isolator.subscribe();

        let shared = Arc::new(Shared {
            topology,
            guard,
            codec: Arc::new(BinarySpeedCodec::new(config.upstream.validate_crc)),
            controller,
            isolator,
            notifier,
            paused: AtomicBool::new(false),
            pauses: AtomicU64::new(0),
            degrade_causes: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        });

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        let subscribe = |kind: ChannelKind| hub.subscribe(kind, config.hub.capacity_for(kind));

        let (rx, unsub) = subscribe(ChannelKind::Speed);
        tasks.push((
            "speed",
            tokio::spawn(speed_worker(shared.clone(), planner, rx, unsub, cancel.clone())),
        ));

        let (rx, unsub) = subscribe(ChannelKind::Heartbeat);
        tasks.push((
            "heartbeat",
            tokio::spawn(heartbeat_worker(shared.clone(), rx, unsub, cancel.clone())),
        ));

        let (rx, unsub) = subscribe(ChannelKind::Position);
        tasks.push((
            "position",
            tokio::spawn(position_worker(shared.clone(), rx, unsub, cancel.clone())),
        ));

        let period = (guard_config.heartbeat_timeout / 2).max(Duration::from_millis(1));
        tasks.push((
            "heartbeat_watchdog",
            tokio::spawn(heartbeat_watchdog(shared.clone(), period, cancel.clone())),
        ));

        tasks.push((
            "safety",
            tokio::spawn(safety_worker(shared.clone(), safety_changes, cancel.clone())),
        ));

        match axis_events {
            Some(stream) => tasks.push((
                "event_pump",
                tokio::spawn(event_pump(shared.clone(), stream, cancel.clone())),
            )),
            None => warn!("axis event stream already taken, event pump not started"),
        }

        let mut started = Vec::with_capacity(transports.len());
        for transport in transports {
            let kind = transport.config().kind;
            let events = transport.subscribe_default();
            tasks.push((
                "transport",
                tokio::spawn(transport_worker(shared.clone(), kind, events, cancel.clone())),
            ));
            transport.start();
            started.push(Arc::new(transport));
        }

        info!(
            axes = shared.topology.len(),
            main = shared.topology.main_count(),
            eject = shared.topology.eject_count(),
            transports = started.len(),
            "line pipeline started"
        );

        Ok(Self {
            shared,
            params,
            cancel,
            tasks: Mutex::new(tasks),
            transports: started,
            stopped: AtomicBool::new(false),
        })
    }

    /// Stop all axes and ignore speed frames until [`resume`](Self::resume).
    pub async fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::AcqRel) {
            self.shared.pauses.fetch_add(1, Ordering::AcqRel);
            info!("line paused");
            self.shared.controller.stop_all().await;
        }
    }

    /// Accept speed frames again.
    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::AcqRel) {
            self.shared.controller.reset_last_speeds();
            info!("line resumed");
        }
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Cancel every worker, join them, stop transports and drives.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("line pipeline stopping");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(worker = name, error = %e, "worker ended abnormally");
            }
        }
        for transport in &self.transports {
            transport.stop().await;
        }
        self.shared.controller.shutdown().await;
        info!("line pipeline stopped");
    }

    pub fn counters(&self) -> PipelineCounters {
        self.shared.counters.snapshot()
    }

    pub fn isolator(&self) -> &Arc<SafetyIsolator> {
        &self.shared.isolator
    }

    pub fn controller(&self) -> &Arc<AxisController> {
        &self.shared.controller
    }

    pub fn guard(&self) -> &FrameGuard {
        &self.shared.guard
    }

    /// Handle for retuning the planner while the line runs.
    pub fn planner_params(&self) -> PlannerParamsHandle {
        self.params.clone()
    }

    pub fn notifier(&self) -> &Arc<dyn RealtimeNotifier> {
        &self.shared.notifier
    }

    /// Token cancelled when the pipeline shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn transports(&self) -> &[Arc<Transport>] {
        &self.transports
    }
}

impl Drop for LinePipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─── Workers ────────────────────────────────────────────────────────

async fn speed_worker(
    shared: Arc<Shared>,
    mut planner: SpeedPlanner,
    mut rx: FrameReceiver,
    _unsubscribe: Unsubscribe,
    cancel: CancellationToken,
) {
    let mut assembler = FrameAssembler::new(FrameCommand::Speed);
    let mut seen = shared.reset_epoch();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = rx.recv() => match chunk {
                Some(bytes) => bytes,
                None => break,
            },
        };
        assembler.push(&chunk);
        loop {
            match assembler.next_frame(&*shared.codec) {
                Ok(Some(frame)) => shared.process_speed_frame(&mut planner, &mut seen, &frame).await,
                Ok(None) => break,
                Err(e) => shared.speed_decode_failed(&e, chunk.len()),
            }
        }
    }
    debug!(
        dropped = rx.dropped(),
        buffered = assembler.buffered(),
        "speed worker stopped"
    );
}

async fn heartbeat_worker(
    shared: Arc<Shared>,
    mut rx: FrameReceiver,
    _unsubscribe: Unsubscribe,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(_) => shared.guard.record_heartbeat(),
                None => break,
            },
        }
    }
    debug!("heartbeat worker stopped");
}

async fn heartbeat_watchdog(shared: Arc<Shared>, period: Duration, cancel: CancellationToken) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        if shared.guard.is_heartbeat_stale(Instant::now()) {
            shared.raise_degrade(SafetyTriggerKind::HeartbeatTimeout, "upstream heartbeat stale");
        } else {
            shared.clear_degrade(SafetyTriggerKind::HeartbeatTimeout, "upstream heartbeat restored");
        }
    }
    debug!("heartbeat watchdog stopped");
}

async fn safety_worker(
    shared: Arc<Shared>,
    mut changes: broadcast::Receiver<SafetyStateChanged>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };
        match change {
            Ok(c) => shared.on_safety_change(c.previous, c.current).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "safety worker lagged");
                if shared.isolator.state() == SafetyIsolationState::Isolated {
                    shared.controller.stop_all().await;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("safety worker stopped");
}

async fn transport_worker(
    shared: Arc<Shared>,
    kind: ChannelKind,
    mut events: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            TransportEvent::StateChanged {
                state,
                endpoint,
                reason,
                attempt,
                next_delay,
                ..
            } => {
                info!(
                    channel = %kind,
                    %endpoint,
                    state = state.as_str(),
                    ?reason,
                    attempt,
                    ?next_delay,
                    "upstream link state"
                );
                if kind == ChannelKind::Speed {
                    shared.on_speed_link(state);
                }
                shared.publish(
                    LINK_CHANNEL,
                    json!({
                        "channel": kind.as_str(),
                        "state": state.as_str(),
                        "endpoint": endpoint,
                        "attempt": attempt,
                    }),
                );
            }
            TransportEvent::Error {
                message,
                is_transient,
                endpoint,
                ..
            } => warn!(channel = %kind, %endpoint, is_transient, message, "upstream link error"),
            TransportEvent::Data(_) | TransportEvent::BytesReceived { .. } => {}
        }
    }
    debug!(channel = %kind, "transport worker stopped");
}

async fn position_worker(
    shared: Arc<Shared>,
    mut rx: FrameReceiver,
    _unsubscribe: Unsubscribe,
    cancel: CancellationToken,
) {
    let mut assembler = FrameAssembler::new(FrameCommand::Position);
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = rx.recv() => match chunk {
                Some(bytes) => bytes,
                None => break,
            },
        };
        assembler.push(&chunk);
        loop {
            let frame = match assembler.next_frame(&*shared.codec) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "position bytes dropped: bad header");
                    continue;
                }
            };
            match shared.codec.try_decode_position(&frame) {
                Ok(set) => match serde_json::to_value(&set) {
                    Ok(payload) => shared.publish(POSITION_CHANNEL, payload),
                    Err(e) => warn!(error = %e, "position frame not serialisable"),
                },
                Err(e) => debug!(error = %e, "position frame dropped: decode failed"),
            }
        }
    }
    debug!("position worker stopped");
}

async fn event_pump(
    shared: Arc<Shared>,
    mut stream: mpsc::Receiver<AxisEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = stream.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        shared.on_axis_event(&event);
    }
    debug!("event pump stopped");
}
