//! Singulation Line Upstream Link
//!
//! Everything between the vision system's TCP sockets and decoded frames:
//!
//! - [`transport`] - Resilient client/server byte stream with reconnect backoff
//! - [`hub`] - Per-channel fan-out with bounded drop-oldest subscriber queues
//! - [`codec`] - Reference binary codec for `0x81` speed / `0x82` position frames,
//!   plus stream reassembly of frames split or merged by TCP reads
//! - [`error`] - Transport error taxonomy (reported as events, never returned)

pub mod codec;
pub mod error;
pub mod hub;
pub mod transport;

pub use codec::{BinarySpeedCodec, FrameAssembler};
pub use error::TransportError;
pub use hub::{FrameHub, FrameReceiver, Unsubscribe};
pub use transport::{
    BackoffPolicy, Transport, TransportConfig, TransportEvent, TransportState,
};
