//! Reference binary codec for upstream speed and position frames.
//!
//! # Wire layout (little-endian)
//!
//! | Offset | Size | Field                              |
//! |--------|------|------------------------------------|
//! | 0      | 1    | command (`0x81` speed, `0x82` pos) |
//! | 1      | 8    | sequence (`i64`)                   |
//! | 9      | 8    | timestamp, Unix ms (`i64`)         |
//! | 17     | 1    | unit (0 = m/s, 1 = rpm)            |
//! | 18     | 1    | main axis count                    |
//! | 19     | 1    | eject axis count                   |
//! | 20     | 4·n  | speeds (`f32`), main then eject    |
//! | 20+4·n | 2    | CRC16/MODBUS (only if enabled)     |
//!
//! Frames carry no delimiter, so a TCP read may hold several frames or a
//! fraction of one. [`FrameAssembler`] buffers read chunks and cuts
//! complete frames out using the header's axis counts.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::DateTime;
use singu_common::codec::{DecodeError, SpeedCodec};
use singu_common::frame::{FrameCommand, SpeedSet, SpeedUnit};

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 20;

/// Trailing CRC length in bytes.
pub const CRC_LEN: usize = 2;

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Binary codec with optional CRC validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinarySpeedCodec {
    validate_crc: bool,
}

impl BinarySpeedCodec {
    pub const fn new(validate_crc: bool) -> Self {
        Self { validate_crc }
    }

    #[inline]
    pub const fn validate_crc(&self) -> bool {
        self.validate_crc
    }

    /// Encode a speed frame (`0x81`).
    pub fn encode_speed(&self, set: &SpeedSet) -> Bytes {
        self.encode(FrameCommand::Speed, set)
    }

    /// Encode a position frame (`0x82`).
    pub fn encode_position(&self, set: &SpeedSet) -> Bytes {
        self.encode(FrameCommand::Position, set)
    }

    fn encode(&self, command: FrameCommand, set: &SpeedSet) -> Bytes {
        let count = set.axis_count();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 * count + CRC_LEN);
        buf.put_u8(command as u8);
        buf.put_i64_le(set.sequence());
        buf.put_i64_le(set.timestamp().timestamp_millis());
        buf.put_u8(set.unit() as u8);
        buf.put_u8(set.main_speeds().len() as u8);
        buf.put_u8(set.eject_speeds().len() as u8);
        for v in set.iter() {
            buf.put_f32_le(v as f32);
        }
        if self.validate_crc {
            let crc = crc16_modbus(&buf);
            buf.put_u16_le(crc);
        }
        buf.freeze()
    }

    /// Frame length announced by a complete header, CRC included.
    fn announced_len(&self, header: &[u8]) -> usize {
        let axes = header[18] as usize + header[19] as usize;
        HEADER_LEN + 4 * axes + if self.validate_crc { CRC_LEN } else { 0 }
    }

    fn decode(&self, expected: FrameCommand, bytes: &[u8]) -> Result<SpeedSet, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                len: bytes.len(),
                need: HEADER_LEN,
            });
        }
        if bytes[0] != expected as u8 {
            return Err(DecodeError::UnexpectedCommand(bytes[0]));
        }

        let sequence = read_i64(&bytes[1..9]);
        let timestamp_ms = read_i64(&bytes[9..17]);
        let unit = SpeedUnit::from_u8(bytes[17]).ok_or(DecodeError::UnknownUnit(bytes[17]))?;
        let main_count = bytes[18] as usize;
        let eject_count = bytes[19] as usize;

        let body_len = HEADER_LEN + 4 * (main_count + eject_count);
        let frame_len = self.announced_len(bytes);
        if bytes.len() != frame_len {
            return Err(DecodeError::LengthMismatch {
                expected: frame_len,
                actual: bytes.len(),
            });
        }
        if self.validate_crc {
            let computed = crc16_modbus(&bytes[..body_len]);
            let received = u16::from_le_bytes([bytes[body_len], bytes[body_len + 1]]);
            if computed != received {
                return Err(DecodeError::CrcMismatch { computed, received });
            }
        }

        let timestamp = DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or(DecodeError::InvalidTimestamp(timestamp_ms))?;

        let mut speeds = bytes[HEADER_LEN..body_len]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64);
        let main: Vec<f64> = speeds.by_ref().take(main_count).collect();
        let eject: Vec<f64> = speeds.collect();

        Ok(SpeedSet::new(sequence, timestamp, unit, main, eject))
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    i64::from_le_bytes(raw)
}

impl SpeedCodec for BinarySpeedCodec {
    fn frame_len(&self, bytes: &[u8]) -> Result<Option<usize>, DecodeError> {
        let Some(&command) = bytes.first() else {
            return Ok(None);
        };
        if !matches!(
            FrameCommand::from_u8(command),
            Some(FrameCommand::Speed | FrameCommand::Position)
        ) {
            return Err(DecodeError::UnexpectedCommand(command));
        }
        if bytes.len() < HEADER_LEN {
            return Ok(None);
        }
        if SpeedUnit::from_u8(bytes[17]).is_none() {
            return Err(DecodeError::UnknownUnit(bytes[17]));
        }
        Ok(Some(self.announced_len(bytes)))
    }

    fn try_decode_speed(&self, bytes: &[u8]) -> Result<SpeedSet, DecodeError> {
        self.decode(FrameCommand::Speed, bytes)
    }

    fn try_decode_position(&self, bytes: &[u8]) -> Result<SpeedSet, DecodeError> {
        self.decode(FrameCommand::Position, bytes)
    }
}

// ─── Stream reassembly ──────────────────────────────────────────────

/// Reassembles frames of one command from a byte stream.
///
/// Read chunks go in through [`push`](Self::push); complete frames come
/// out of [`next_frame`](Self::next_frame). A header the codec rejects
/// discards bytes up to the next `command` byte and reports the error
/// once, so the stream resynchronises on the following frame.
#[derive(Debug)]
pub struct FrameAssembler {
    command: FrameCommand,
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new(command: FrameCommand) -> Self {
        Self {
            command,
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes waiting for the rest of their frame.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, `Ok(None)` when more bytes are needed.
    pub fn next_frame(&mut self, codec: &dyn SpeedCodec) -> Result<Option<Bytes>, DecodeError> {
        match codec.frame_len(&self.buf) {
            Ok(Some(len)) if len > 0 && self.buf.len() >= len => {
                Ok(Some(self.buf.split_to(len).freeze()))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                self.resync();
                Err(e)
            }
        }
    }

    fn resync(&mut self) {
        let start = self.command as u8;
        match self.buf.iter().skip(1).position(|b| *b == start) {
            Some(at) => self.buf.advance(at + 1),
            None => self.buf.clear(),
        }
    }
}
