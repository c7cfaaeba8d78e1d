//! Drive event aggregation.
//!
//! Each attached drive gets a relay task that tags its [`DriveEvent`]s
//! with the axis and forwards them into one bounded `mpsc` stream. The
//! aggregator holds no business logic; it only relays.
//!
//! Relays never block: when the merged stream is full the event is
//! dropped and counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use singu_common::axis::{AxisEvent, AxisId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::drive::AxisDrive;

/// Default merged-stream capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

pub struct AxisEventAggregator {
    tx: mpsc::Sender<AxisEvent>,
    rx: Mutex<Option<mpsc::Receiver<AxisEvent>>>,
    relays: Mutex<HashMap<AxisId, JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
}

impl AxisEventAggregator {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            relays: Mutex::new(HashMap::new()),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start relaying `drive`'s events. Re-attaching an axis replaces its
    /// previous relay.
    pub fn attach(&self, drive: &Arc<dyn AxisDrive>) {
        let axis = drive.axis();
        let mut events = drive.subscribe();
        let tx = self.tx.clone();
        let dropped = Arc::clone(&self.dropped);

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => forward(&tx, &dropped, event.into_axis_event(axis)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        dropped.fetch_add(n, Ordering::Relaxed);
                        warn!(%axis, missed = n, "drive event relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(%axis, "drive event source closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.relays.lock().insert(axis, handle) {
            previous.abort();
        }
        debug!(%axis, "drive events attached");
    }

    /// Stop relaying `axis`. Returns whether a relay was attached.
    pub fn detach(&self, axis: AxisId) -> bool {
        match self.relays.lock().remove(&axis) {
            Some(handle) => {
                handle.abort();
                debug!(%axis, "drive events detached");
                true
            }
            None => false,
        }
    }

    pub fn detach_all(&self) {
        for (_, handle) in self.relays.lock().drain() {
            handle.abort();
        }
    }

    /// Inject a controller-level event into the merged stream.
    pub fn report(&self, event: AxisEvent) {
        forward(&self.tx, &self.dropped, event);
    }

    /// Take the merged stream. Only the first call returns `Some`.
    pub fn take_stream(&self) -> Option<mpsc::Receiver<AxisEvent>> {
        self.rx.lock().take()
    }

    pub fn attached_count(&self) -> usize {
        self.relays.lock().len()
    }

    pub fn is_attached(&self, axis: AxisId) -> bool {
        self.relays.lock().contains_key(&axis)
    }

    /// Events lost to a full stream or a lagging relay.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for AxisEventAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl Drop for AxisEventAggregator {
    fn drop(&mut self) {
        self.detach_all();
    }
}

fn forward(tx: &mpsc::Sender<AxisEvent>, dropped: &AtomicU64, event: AxisEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            debug!(?event, "axis event stream full, event dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
