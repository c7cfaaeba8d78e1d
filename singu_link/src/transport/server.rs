//! Server role: bind, accept one peer at a time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::reader::{self, ReadExit};
use super::{Backoff, PeerHandle, Shared, TransportState};
use crate::error::TransportError;

pub(super) async fn run(shared: Arc<Shared>, cancel: CancellationToken, mut backoff: Backoff) {
    let Some(listener) = bind(&shared, &cancel, &mut backoff).await else {
        return;
    };
    backoff.reset();
    shared.set_state(
        TransportState::Connecting,
        Some("listening".into()),
        0,
        None,
        false,
    );

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                backoff.reset();
                install_peer(&shared, &cancel, stream, addr);
            }
            Err(e) => {
                let err = TransportError::accept(&shared.endpoint, &e);
                let reason = err.to_string();
                shared.report_error(err);
                let (attempt, delay) = backoff.next_delay();
                shared.set_state(TransportState::Retrying, Some(reason), attempt, Some(delay), false);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let peer = shared.peer.lock().take();
    if let Some(peer) = peer {
        peer.cancel.cancel();
        let _ = peer.task.await;
    }
}

/// Bind with backoff. `None` when cancelled first.
async fn bind(
    shared: &Shared,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Option<TcpListener> {
    loop {
        shared.set_state(TransportState::Connecting, None, backoff.attempt(), None, false);
        let bound = tokio::select! {
            _ = cancel.cancelled() => return None,
            bound = TcpListener::bind(shared.endpoint.as_str()) => bound,
        };
        match bound {
            Ok(listener) => {
                info!(endpoint = %shared.endpoint, "transport listening");
                return Some(listener);
            }
            Err(e) => {
                let err = TransportError::bind(&shared.endpoint, &e);
                let reason = err.to_string();
                shared.report_error(err);
                let (attempt, delay) = backoff.next_delay();
                shared.set_state(TransportState::Retrying, Some(reason), attempt, Some(delay), false);
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Put a freshly accepted peer in the slot, then tear down the previous one.
fn install_peer(
    shared: &Arc<Shared>,
    cancel: &CancellationToken,
    stream: TcpStream,
    addr: SocketAddr,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %addr, error = %e, "set_nodelay failed");
    }
    let id = shared.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let token = cancel.child_token();

    shared.set_state(
        TransportState::Connected,
        Some(format!("peer {addr}")),
        0,
        None,
        false,
    );
    let previous = {
        let mut slot = shared.peer.lock();
        let task = tokio::spawn(serve_peer(Arc::clone(shared), stream, token.clone(), id));
        slot.replace(PeerHandle {
            id,
            addr,
            cancel: token,
            task,
        })
    };

    if let Some(previous) = previous {
        info!(old = %previous.addr, new = %addr, "replacing upstream peer");
        previous.cancel.cancel();
    }
}

async fn serve_peer(shared: Arc<Shared>, stream: TcpStream, cancel: CancellationToken, id: u64) {
    let exit = reader::pump(&shared, stream, &cancel).await;

    let (reason, passive) = match exit {
        ReadExit::Cancelled => return,
        ReadExit::Closed => ("closed by peer".to_string(), true),
        ReadExit::Failed(err) => {
            let reason = err.to_string();
            shared.report_error(err);
            (reason, false)
        }
    };

    {
        let mut slot = shared.peer.lock();
        if slot.as_ref().map(|p| p.id) != Some(id) {
            // Already replaced by a newer peer.
            return;
        }
        slot.take();
    }
    shared.set_state(TransportState::Disconnected, Some(reason), 0, None, passive);
}
