//! Decoded upstream frames and channel vocabulary.
//!
//! A [`SpeedSet`] is one decoded speed (or position) frame from the vision
//! system. It is immutable once produced; downstream stages that need to
//! alter speeds (degrade scaling) build a new set with [`SpeedSet::scaled`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consts::{HEARTBEAT_QUEUE_CAPACITY, POSITION_QUEUE_CAPACITY, SPEED_QUEUE_CAPACITY};

// ─── Units ──────────────────────────────────────────────────────────

/// Unit of the values carried in a [`SpeedSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SpeedUnit {
    /// Linear belt speed in metres per second.
    MetersPerSecond = 0,
    /// Rotational speed in revolutions per minute.
    Rpm = 1,
}

impl SpeedUnit {
    /// Convert from the wire byte. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::MetersPerSecond),
            1 => Some(Self::Rpm),
            _ => None,
        }
    }
}

// ─── SpeedSet ───────────────────────────────────────────────────────

/// One decoded upstream frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSet {
    sequence: i64,
    timestamp: DateTime<Utc>,
    unit: SpeedUnit,
    main_speeds: Vec<f64>,
    eject_speeds: Vec<f64>,
}

impl SpeedSet {
    pub fn new(
        sequence: i64,
        timestamp: DateTime<Utc>,
        unit: SpeedUnit,
        main_speeds: Vec<f64>,
        eject_speeds: Vec<f64>,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            unit,
            main_speeds,
            eject_speeds,
        }
    }

    /// Build a set stamped with the current time.
    pub fn now(sequence: i64, unit: SpeedUnit, main_speeds: Vec<f64>, eject_speeds: Vec<f64>) -> Self {
        Self::new(sequence, Utc::now(), unit, main_speeds, eject_speeds)
    }

    #[inline]
    pub const fn sequence(&self) -> i64 {
        self.sequence
    }

    #[inline]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    pub const fn unit(&self) -> SpeedUnit {
        self.unit
    }

    #[inline]
    pub fn main_speeds(&self) -> &[f64] {
        &self.main_speeds
    }

    #[inline]
    pub fn eject_speeds(&self) -> &[f64] {
        &self.eject_speeds
    }

    /// Total number of axis values (main + eject).
    #[inline]
    pub fn axis_count(&self) -> usize {
        self.main_speeds.len() + self.eject_speeds.len()
    }

    /// Iterate all values in slot order: main speeds, then eject speeds.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.main_speeds
            .iter()
            .chain(self.eject_speeds.iter())
            .copied()
    }

    /// Whether every value is finite.
    pub fn is_finite(&self) -> bool {
        self.iter().all(f64::is_finite)
    }

    /// Return a copy with every speed multiplied by `factor`.
    ///
    /// Sequence, timestamp and unit are preserved.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            sequence: self.sequence,
            timestamp: self.timestamp,
            unit: self.unit,
            main_speeds: self.main_speeds.iter().map(|v| v * factor).collect(),
            eject_speeds: self.eject_speeds.iter().map(|v| v * factor).collect(),
        }
    }
}

// ─── Channels ───────────────────────────────────────────────────────

/// Logical upstream channel. Each has its own TCP port and hub queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Speed,
    Position,
    Heartbeat,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [Self::Speed, Self::Position, Self::Heartbeat];

    /// Default per-subscriber queue capacity.
    #[inline]
    pub const fn default_capacity(self) -> usize {
        match self {
            Self::Speed => SPEED_QUEUE_CAPACITY,
            Self::Position => POSITION_QUEUE_CAPACITY,
            Self::Heartbeat => HEARTBEAT_QUEUE_CAPACITY,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Position => "position",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Upstream command bytes ─────────────────────────────────────────

/// Leading command byte of an upstream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameCommand {
    Speed = 0x81,
    Position = 0x82,
    ParamGetA = 0x83,
    ParamSetA = 0x84,
    ParamGetB = 0x85,
    ParamSetB = 0x86,
    ParamGetC = 0x87,
    ParamSetC = 0x88,
    StartStop = 0x89,
    StatusResponse = 0x5B,
    ParamResponse = 0x5C,
}

impl FrameCommand {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::Speed),
            0x82 => Some(Self::Position),
            0x83 => Some(Self::ParamGetA),
            0x84 => Some(Self::ParamSetA),
            0x85 => Some(Self::ParamGetB),
            0x86 => Some(Self::ParamSetB),
            0x87 => Some(Self::ParamGetC),
            0x88 => Some(Self::ParamSetC),
            0x89 => Some(Self::StartStop),
            0x5B => Some(Self::StatusResponse),
            0x5C => Some(Self::ParamResponse),
            _ => None,
        }
    }

    /// Classify a raw frame by its first byte.
    #[inline]
    pub fn classify(bytes: &[u8]) -> Option<Self> {
        bytes.first().and_then(|b| Self::from_u8(*b))
    }

    /// Parameter get/set commands (`0x83..=0x88`).
    #[inline]
    pub const fn is_parameter(self) -> bool {
        matches!(self as u8, 0x83..=0x88)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> SpeedSet {
        SpeedSet::now(7, SpeedUnit::MetersPerSecond, vec![1.0, 2.0], vec![0.5])
    }

    #[test]
    fn iter_is_main_then_eject() {
        let values: Vec<f64> = set().iter().collect();
        assert_eq!(values, vec![1.0, 2.0, 0.5]);
        assert_eq!(set().axis_count(), 3);
    }

    #[test]
    fn scaled_preserves_identity() {
        let original = set();
        let scaled = original.scaled(0.5);
        assert_eq!(scaled.sequence(), 7);
        assert_eq!(scaled.timestamp(), original.timestamp());
        assert_eq!(scaled.unit(), SpeedUnit::MetersPerSecond);
        assert_eq!(scaled.main_speeds(), &[0.5, 1.0]);
        assert_eq!(scaled.eject_speeds(), &[0.25]);
        // Original untouched.
        assert_eq!(original.main_speeds(), &[1.0, 2.0]);
    }

    #[test]
    fn non_finite_detected() {
        let bad = SpeedSet::now(1, SpeedUnit::Rpm, vec![f64::NAN], vec![]);
        assert!(!bad.is_finite());
        assert!(set().is_finite());
    }

    #[test]
    fn channel_default_capacities() {
        assert_eq!(ChannelKind::Speed.default_capacity(), 256);
        assert_eq!(ChannelKind::Position.default_capacity(), 256);
        assert_eq!(ChannelKind::Heartbeat.default_capacity(), 64);
    }

    #[test]
    fn classify_command_bytes() {
        assert_eq!(FrameCommand::classify(&[0x81, 0, 0]), Some(FrameCommand::Speed));
        assert_eq!(FrameCommand::classify(&[0x5C]), Some(FrameCommand::ParamResponse));
        assert_eq!(FrameCommand::classify(&[0x00]), None);
        assert_eq!(FrameCommand::classify(&[]), None);
        assert!(FrameCommand::ParamSetB.is_parameter());
        assert!(!FrameCommand::StartStop.is_parameter());
    }

    #[test]
    fn unit_from_wire() {
        assert_eq!(SpeedUnit::from_u8(0), Some(SpeedUnit::MetersPerSecond));
        assert_eq!(SpeedUnit::from_u8(1), Some(SpeedUnit::Rpm));
        assert_eq!(SpeedUnit::from_u8(9), None);
    }
}
