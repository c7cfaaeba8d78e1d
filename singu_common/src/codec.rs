//! Contract between raw upstream bytes and decoded [`SpeedSet`] values.
//!
//! The pipeline only depends on [`SpeedCodec`]; the reference binary
//! implementation lives in `singu_link::codec`.
//!
//! Implementations must keep `SpeedSet::sequence` monotonically meaningful
//! across frames and flag the unit correctly.

use thiserror::Error;

use crate::frame::SpeedSet;

/// Malformed or undecodable frame. The frame is dropped; processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes (need {need})")]
    TooShort { len: usize, need: usize },

    #[error("unexpected command byte 0x{0:02X}")]
    UnexpectedCommand(u8),

    #[error("unknown speed unit {0}")]
    UnknownUnit(u8),

    #[error("length mismatch: header announces {expected} bytes, frame has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch { computed: u16, received: u16 },

    #[error("invalid timestamp {0} ms")]
    InvalidTimestamp(i64),
}

/// Decoder for upstream speed and position frames.
pub trait SpeedCodec: Send + Sync {
    /// Length of the frame starting at `bytes[0]`, or `Ok(None)` until
    /// enough of its header has arrived. Stream readers use this to cut
    /// frames out of arbitrary read chunks.
    ///
    /// Default: every chunk is exactly one frame.
    fn frame_len(&self, bytes: &[u8]) -> Result<Option<usize>, DecodeError> {
        Ok((!bytes.is_empty()).then_some(bytes.len()))
    }

    /// Decode a speed frame (`0x81`).
    fn try_decode_speed(&self, bytes: &[u8]) -> Result<SpeedSet, DecodeError>;

    /// Decode a position frame (`0x82`). Default: unsupported.
    fn try_decode_position(&self, bytes: &[u8]) -> Result<SpeedSet, DecodeError> {
        Err(DecodeError::UnexpectedCommand(bytes.first().copied().unwrap_or(0)))
    }
}
