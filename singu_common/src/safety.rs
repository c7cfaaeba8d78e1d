//! Safety isolation vocabulary shared by the control unit and the line.
//!
//! The isolator in `singu_control_unit` owns the state; every other
//! component only reads it or submits `(kind, reason)` trigger requests.

use serde::{Deserialize, Serialize};

/// Safety isolation overlay (Normal → Degraded → Isolated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SafetyIsolationState {
    /// Pipeline output applied as planned.
    #[default]
    Normal = 0,
    /// Reduced confidence: motion continues at degrade scale.
    Degraded = 1,
    /// Motion inhibited until explicit reset.
    Isolated = 2,
}

impl SafetyIsolationState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Degraded),
            2 => Some(Self::Isolated),
            _ => None,
        }
    }

    /// Whether planned speeds may reach the drives.
    #[inline]
    pub const fn allows_motion(self) -> bool {
        !matches!(self, Self::Isolated)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Degraded => "degraded",
            Self::Isolated => "isolated",
        }
    }
}

impl std::fmt::Display for SafetyIsolationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of a safety trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTriggerKind {
    /// Physical E-stop button.
    EmergencyStop,
    /// Remote (upstream / operator station) trip request.
    RemoteTrip,
    /// Upstream transport lost.
    Disconnect,
    /// Upstream heartbeat not observed within the timeout.
    HeartbeatTimeout,
    /// Drive bring-up failed (vendor library, bus open, controller fault).
    CommissioningFailure,
    /// Operator action on the local panel.
    Operator,
    /// Recovery / reset request.
    Recovery,
}

/// Local vs remote control authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    #[default]
    Remote,
    Local,
}

/// Button edges surfaced by the cabinet safety I/O module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "mode", rename_all = "snake_case")]
pub enum SafetyIoEvent {
    EmergencyStop,
    StopRequested,
    StartRequested,
    ResetRequested,
    RemoteLocalModeChanged(ControlMode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_state_round_trip_u8() {
        for s in [
            SafetyIsolationState::Normal,
            SafetyIsolationState::Degraded,
            SafetyIsolationState::Isolated,
        ] {
            assert_eq!(SafetyIsolationState::from_u8(s as u8), Some(s));
        }
        assert_eq!(SafetyIsolationState::from_u8(3), None);
    }

    #[test]
    fn only_isolated_blocks_motion() {
        assert!(SafetyIsolationState::Normal.allows_motion());
        assert!(SafetyIsolationState::Degraded.allows_motion());
        assert!(!SafetyIsolationState::Isolated.allows_motion());
    }

    #[test]
    fn default_state_is_normal() {
        assert_eq!(SafetyIsolationState::default(), SafetyIsolationState::Normal);
        assert_eq!(ControlMode::default(), ControlMode::Remote);
    }
}
