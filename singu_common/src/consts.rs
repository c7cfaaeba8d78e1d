//! System-wide constants for the singulation line workspace.
//!
//! Single source of truth for numeric limits and defaults.
//! Imported by all crates: no duplication permitted.

use std::time::Duration;

/// Maximum number of axes on one line.
pub const MAX_AXES: usize = 64;

/// Maximum sequence window tracked by the frame guard.
pub const MAX_SEQUENCE_WINDOW: usize = 64;

/// Default hub queue capacity for speed frames.
pub const SPEED_QUEUE_CAPACITY: usize = 256;

/// Default hub queue capacity for position frames.
pub const POSITION_QUEUE_CAPACITY: usize = 256;

/// Default hub queue capacity for heartbeat frames.
pub const HEARTBEAT_QUEUE_CAPACITY: usize = 64;

/// Initial reconnect delay.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Reconnect delay cap (jitter excluded).
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Upper bound (exclusive) of the random jitter added to each reconnect delay.
pub const RECONNECT_JITTER: Duration = Duration::from_millis(500);

/// Default connect attempt timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default control period of the planning loop.
pub const DEFAULT_CONTROL_PERIOD: Duration = Duration::from_millis(20);

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/singu/singu.toml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_AXES > 0 && MAX_AXES <= u16::MAX as usize);
        assert!(MAX_SEQUENCE_WINDOW > 0);
        assert!(HEARTBEAT_QUEUE_CAPACITY <= SPEED_QUEUE_CAPACITY);
        assert!(RECONNECT_INITIAL_DELAY < RECONNECT_MAX_DELAY);
    }

    #[test]
    fn initial_delay_outgrows_jitter() {
        // Doubling from the initial delay must add more than the jitter range,
        // otherwise consecutive reported delays could shrink.
        assert!(RECONNECT_INITIAL_DELAY >= RECONNECT_JITTER);
    }
}
