//! Resilient upstream byte-stream transport.
//!
//! A [`Transport`] owns one TCP endpoint for one [`ChannelKind`]. In
//! [`TransportRole::Client`] it dials the peer; in [`TransportRole::Server`]
//! it binds and keeps at most one accepted peer, a new accept replacing the
//! previous one.
//!
//! # State machine
//!
//! ```text
//! Stopped ──start──▶ Connecting ──▶ Connected ──peer close──▶ Disconnected
//!                        ▲               │                        │
//!                        │            error                       │
//!                        │               ▼                        │
//!                        └──backoff── Retrying ◀──────────────────┘
//!
//! any ──stop──▶ Stopped
//! ```
//!
//! Errors never surface from [`Transport::start`] or [`Transport::stop`];
//! they are logged and delivered as [`TransportEvent::Error`].

mod backoff;
mod client;
mod reader;
mod server;

pub use backoff::{Backoff, BackoffPolicy};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use singu_common::consts::CONNECT_TIMEOUT;
use singu_common::frame::ChannelKind;
use singu_common::line::{TransportRole, UpstreamConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::hub::FrameHub;

/// Default read buffer size.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Default per-subscriber event queue capacity.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

// ─── Configuration ──────────────────────────────────────────────────

/// Endpoint and timing parameters of one transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub role: TransportRole,
    pub host: String,
    pub port: u16,
    pub kind: ChannelKind,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub read_buffer_size: usize,
    pub event_capacity: usize,
}

impl TransportConfig {
    pub fn client(host: impl Into<String>, port: u16, kind: ChannelKind) -> Self {
        Self {
            role: TransportRole::Client,
            host: host.into(),
            port,
            kind,
            connect_timeout: CONNECT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            read_buffer_size: READ_BUFFER_SIZE,
            event_capacity: EVENT_QUEUE_CAPACITY,
        }
    }

    pub fn server(host: impl Into<String>, port: u16, kind: ChannelKind) -> Self {
        Self {
            role: TransportRole::Server,
            ..Self::client(host, port, kind)
        }
    }

    /// Transport for `kind` as described by the `[upstream]` section.
    pub fn from_upstream(upstream: &UpstreamConfig, kind: ChannelKind) -> Self {
        Self {
            role: upstream.role,
            host: upstream.host.clone(),
            port: upstream.port_for(kind),
            kind,
            connect_timeout: upstream.connect_timeout(),
            backoff: BackoffPolicy::from_upstream(upstream),
            read_buffer_size: READ_BUFFER_SIZE,
            event_capacity: EVENT_QUEUE_CAPACITY,
        }
    }

    /// `host:port` as dialled or bound.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─── State & Events ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Connecting,
    Connected,
    Retrying,
    /// Peer closed the connection.
    Disconnected,
    /// Explicitly stopped. Terminal until the next `start()`.
    Stopped,
}

impl TransportState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the upstream link is currently lost.
    #[inline]
    pub const fn is_link_lost(self) -> bool {
        matches!(self, Self::Retrying | Self::Disconnected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable transport activity.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Received payload, copied out of the read buffer.
    Data(Bytes),
    /// Receive statistics for the chunk delivered in the preceding `Data`.
    BytesReceived {
        bytes: usize,
        port: u16,
        at: DateTime<Utc>,
    },
    StateChanged {
        state: TransportState,
        endpoint: String,
        reason: Option<String>,
        /// Retry attempt (1-indexed) for `Retrying`, 0 otherwise.
        attempt: u32,
        /// Wait before the next attempt, set for `Retrying`.
        next_delay: Option<Duration>,
        /// Closed by the peer rather than by us or by an error.
        passive: bool,
    },
    Error {
        message: String,
        source: TransportError,
        is_transient: bool,
        endpoint: String,
        port: u16,
    },
}

// ─── Shared state ───────────────────────────────────────────────────

#[derive(Debug)]
struct PeerHandle {
    id: u64,
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared between the owning [`Transport`] and its I/O tasks.
#[derive(Debug)]
struct Shared {
    config: TransportConfig,
    endpoint: String,
    hub: Option<FrameHub>,
    sinks: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    state: Mutex<TransportState>,
    dropped_events: AtomicU64,
    bytes_received: AtomicU64,
    peer: Mutex<Option<PeerHandle>>,
    next_peer_id: AtomicU64,
}

impl Shared {
    /// Deliver to every subscriber without waiting; prune closed ones.
    fn emit(&self, event: TransportEvent) {
        let mut sinks = self.sinks.lock();
        sinks.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn set_state(
        &self,
        state: TransportState,
        reason: Option<String>,
        attempt: u32,
        next_delay: Option<Duration>,
        passive: bool,
    ) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            info!(
                endpoint = %self.endpoint,
                channel = %self.config.kind,
                from = %previous,
                to = %state,
                attempt,
                reason = reason.as_deref().unwrap_or(""),
                "transport state changed"
            );
        } else {
            debug!(endpoint = %self.endpoint, state = %state, attempt, "transport state repeated");
        }
        self.emit(TransportEvent::StateChanged {
            state,
            endpoint: self.endpoint.clone(),
            reason,
            attempt,
            next_delay,
            passive,
        });
    }

    fn report_error(&self, error: TransportError) {
        let is_transient = error.is_transient();
        warn!(
            endpoint = %self.endpoint,
            operation = error.operation(),
            transient = is_transient,
            "{error}"
        );
        self.emit(TransportEvent::Error {
            message: error.to_string(),
            source: error,
            is_transient,
            endpoint: self.endpoint.clone(),
            port: self.config.port,
        });
    }

    /// Copy one received chunk out of the read buffer and fan it out.
    fn deliver(&self, chunk: &[u8]) {
        let payload = Bytes::copy_from_slice(chunk);
        self.bytes_received
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        if let Some(hub) = &self.hub {
            hub.publish(self.config.kind, payload.clone());
        }
        self.emit(TransportEvent::Data(payload));
        self.emit(TransportEvent::BytesReceived {
            bytes: chunk.len(),
            port: self.config.port,
            at: Utc::now(),
        });
    }
}

// ─── Transport ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Runner {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One resilient TCP endpoint.
#[derive(Debug)]
pub struct Transport {
    shared: Arc<Shared>,
    runner: Mutex<Option<Runner>>,
    seed: Option<u64>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self::build(config, None)
    }

    /// Transport that also publishes every received chunk into `hub`
    /// under the configured channel kind.
    pub fn with_hub(config: TransportConfig, hub: FrameHub) -> Self {
        Self::build(config, Some(hub))
    }

    fn build(config: TransportConfig, hub: Option<FrameHub>) -> Self {
        let endpoint = config.endpoint();
        Self {
            shared: Arc::new(Shared {
                config,
                endpoint,
                hub,
                sinks: Mutex::new(Vec::new()),
                state: Mutex::new(TransportState::Stopped),
                dropped_events: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                peer: Mutex::new(None),
                next_peer_id: AtomicU64::new(1),
            }),
            runner: Mutex::new(None),
            seed: None,
        }
    }

    /// Seed the reconnect jitter for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Spawn the connection loop. No-op while already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut runner = self.runner.lock();
        if runner.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!(endpoint = %self.shared.endpoint, "transport already running");
            return;
        }

        let cancel = CancellationToken::new();
        let mut backoff = Backoff::new(self.shared.config.backoff);
        if let Some(seed) = self.seed {
            backoff = backoff.with_seed(seed);
        }
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let task = match self.shared.config.role {
            TransportRole::Client => tokio::spawn(client::run(shared, token, backoff)),
            TransportRole::Server => tokio::spawn(server::run(shared, token, backoff)),
        };
        info!(
            endpoint = %self.shared.endpoint,
            role = ?self.shared.config.role,
            channel = %self.shared.config.kind,
            "transport started"
        );
        *runner = Some(Runner { cancel, task });
    }

    /// Cancel the loop, wait for it to exit, release the socket and
    /// report `Stopped`. No-op when not running.
    pub async fn stop(&self) {
        let Some(runner) = self.runner.lock().take() else {
            return;
        };
        runner.cancel.cancel();
        if let Err(e) = runner.task.await {
            warn!(endpoint = %self.shared.endpoint, error = %e, "transport task ended abnormally");
        }
        self.shared
            .set_state(TransportState::Stopped, Some("stopped".into()), 0, None, false);
    }

    /// Independent bounded event stream. Slow subscribers lose events.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.shared.sinks.lock().push(tx);
        rx
    }

    /// Event stream with the configured default capacity.
    pub fn subscribe_default(&self) -> mpsc::Receiver<TransportEvent> {
        self.subscribe(self.shared.config.event_capacity)
    }

    pub fn state(&self) -> TransportState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Events discarded because a subscriber queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.bytes_received.load(Ordering::Relaxed)
    }

    /// Address of the currently accepted peer (server role).
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer.lock().as_ref().map(|p| p.addr)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.get_mut().take() {
            runner.cancel.cancel();
        }
    }
}
