//! Realtime push boundary.
//!
//! Publishers call [`RealtimeNotifier::publish`] and move on: the call is
//! synchronous, never awaited or retried, and callers only log failures.

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("channel '{0}' is not accepted by this notifier")]
    UnknownChannel(String),

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

/// Sink for dashboard/realtime messages.
pub trait RealtimeNotifier: Send + Sync {
    fn publish(&self, channel: &str, payload: Value) -> Result<(), NotifyError>;
}

/// Logs each message at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl RealtimeNotifier for TracingNotifier {
    fn publish(&self, channel: &str, payload: Value) -> Result<(), NotifyError> {
        debug!(channel, %payload, "realtime push");
        Ok(())
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl RealtimeNotifier for NullNotifier {
    fn publish(&self, _channel: &str, _payload: Value) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Keeps every message in memory. Used by tests and simulators.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<(String, Value)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all messages published so far.
    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().clone()
    }

    /// Payloads published on one channel.
    pub fn on_channel(&self, channel: &str) -> Vec<Value> {
        self.messages
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl RealtimeNotifier for MemoryNotifier {
    fn publish(&self, channel: &str, payload: Value) -> Result<(), NotifyError> {
        self.messages.lock().push((channel.to_string(), payload));
        Ok(())
    }
}
