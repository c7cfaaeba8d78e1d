//! Receive loop shared by the client and server roles.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::Shared;
use crate::error::TransportError;

/// Why the receive loop ended.
#[derive(Debug)]
pub(super) enum ReadExit {
    /// Cancellation requested (stop or peer replaced).
    Cancelled,
    /// Peer closed the stream.
    Closed,
    Failed(TransportError),
}

/// Read until cancelled, closed or failed. The stream is dropped on return.
pub(super) async fn pump(
    shared: &Shared,
    mut stream: TcpStream,
    cancel: &CancellationToken,
) -> ReadExit {
    let mut buf = vec![0u8; shared.config.read_buffer_size.max(1)];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return ReadExit::Cancelled,
            read = stream.read(&mut buf) => read,
        };
        match read {
            Ok(0) => return ReadExit::Closed,
            Ok(n) => shared.deliver(&buf[..n]),
            Err(e) => return ReadExit::Failed(TransportError::read(&shared.endpoint, &e)),
        }
    }
}
