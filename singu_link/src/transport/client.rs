//! Client role: dial, read, back off, repeat.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::reader::{self, ReadExit};
use super::{Backoff, Shared, TransportState};
use crate::error::TransportError;

pub(super) async fn run(shared: Arc<Shared>, cancel: CancellationToken, mut backoff: Backoff) {
    let endpoint = shared.endpoint.clone();
    let timeout = shared.config.connect_timeout;

    loop {
        shared.set_state(TransportState::Connecting, None, backoff.attempt(), None, false);

        let attempt = tokio::time::timeout(timeout, TcpStream::connect(endpoint.as_str()));
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = attempt => result,
        };

        let reason = match result {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(endpoint = %endpoint, error = %e, "set_nodelay failed");
                }
                backoff.reset();
                shared.set_state(TransportState::Connected, None, 0, None, false);

                match reader::pump(&shared, stream, &cancel).await {
                    ReadExit::Cancelled => return,
                    ReadExit::Closed => {
                        let reason = "closed by peer".to_string();
                        shared.set_state(
                            TransportState::Disconnected,
                            Some(reason.clone()),
                            0,
                            None,
                            true,
                        );
                        reason
                    }
                    ReadExit::Failed(err) => {
                        let reason = err.to_string();
                        shared.report_error(err);
                        reason
                    }
                }
            }
            Ok(Err(e)) => {
                let err = TransportError::connect(&endpoint, &e);
                let reason = err.to_string();
                shared.report_error(err);
                reason
            }
            Err(_) => {
                let err = TransportError::ConnectTimeout {
                    endpoint: endpoint.clone(),
                    after: timeout,
                };
                let reason = err.to_string();
                shared.report_error(err);
                reason
            }
        };

        let (attempt, delay) = backoff.next_delay();
        shared.set_state(TransportState::Retrying, Some(reason), attempt, Some(delay), false);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
