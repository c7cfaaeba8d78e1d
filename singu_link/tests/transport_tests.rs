//! Transport integration tests against real loopback sockets.

use std::time::Duration;

use singu_common::frame::ChannelKind;
use singu_link::hub::FrameHub;
use singu_link::transport::{
    BackoffPolicy, Transport, TransportConfig, TransportEvent, TransportState,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

// ── Helpers ──

const WAIT: Duration = Duration::from_secs(5);

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(200),
        jitter: Duration::from_millis(10),
    }
}

/// A loopback port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn next_matching<F>(rx: &mut mpsc::Receiver<TransportEvent>, mut pred: F) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for transport event")
}

fn is_state(event: &TransportEvent, wanted: TransportState) -> bool {
    matches!(event, TransportEvent::StateChanged { state, .. } if *state == wanted)
}

// ── Tests ──

#[tokio::test]
async fn client_reports_retrying_against_closed_port() {
    let port = closed_port().await;
    let mut config = TransportConfig::client("127.0.0.1", port, ChannelKind::Speed);
    config.backoff = fast_backoff();
    config.connect_timeout = Duration::from_millis(500);

    let transport = Transport::new(config).with_seed(11);
    let mut events = transport.subscribe(64);
    transport.start();

    let mut delays = Vec::new();
    let mut saw_error = false;
    while delays.len() < 3 {
        let event = next_matching(&mut events, |e| {
            matches!(e, TransportEvent::Error { .. }) || is_state(e, TransportState::Retrying)
        })
        .await;
        match event {
            TransportEvent::Error { is_transient, port: p, .. } => {
                assert!(is_transient);
                assert_eq!(p, port);
                saw_error = true;
            }
            TransportEvent::StateChanged {
                attempt,
                next_delay,
                reason,
                ..
            } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                assert!(reason.is_some());
                delays.push(next_delay.expect("retrying carries a delay"));
            }
            _ => unreachable!(),
        }
    }

    assert!(saw_error);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");
    assert!(delays.iter().all(|d| *d < Duration::from_millis(210)));

    transport.stop().await;
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[tokio::test]
async fn client_delivers_bytes_into_hub_and_reports_passive_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let hub = FrameHub::new();
    let (mut frames, _unsub) = hub.subscribe_default(ChannelKind::Speed);
    let mut config = TransportConfig::client("127.0.0.1", port, ChannelKind::Speed);
    config.backoff = fast_backoff();
    let transport = Transport::with_hub(config, hub);
    let mut events = transport.subscribe(64);
    transport.start();

    let (mut peer, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    next_matching(&mut events, |e| is_state(e, TransportState::Connected)).await;

    peer.write_all(&[0x81, 1, 2, 3]).await.unwrap();
    let got = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(&got[..], &[0x81, 1, 2, 3]);

    let received = next_matching(&mut events, |e| {
        matches!(e, TransportEvent::BytesReceived { .. })
    })
    .await;
    assert!(matches!(received, TransportEvent::BytesReceived { bytes: 4, .. }));

    drop(peer);
    let closed = next_matching(&mut events, |e| is_state(e, TransportState::Disconnected)).await;
    assert!(matches!(closed, TransportEvent::StateChanged { passive: true, .. }));

    // Reconnects after the passive close.
    next_matching(&mut events, |e| is_state(e, TransportState::Retrying)).await;
    let _again = tokio::time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    next_matching(&mut events, |e| is_state(e, TransportState::Connected)).await;

    transport.stop().await;
}

#[tokio::test]
async fn server_replaces_previous_peer() {
    let port = closed_port().await;
    let hub = FrameHub::new();
    let (mut frames, _unsub) = hub.subscribe_default(ChannelKind::Heartbeat);
    let mut config = TransportConfig::server("127.0.0.1", port, ChannelKind::Heartbeat);
    config.backoff = fast_backoff();
    let transport = Transport::with_hub(config, hub);
    let mut events = transport.subscribe(64);
    transport.start();

    next_matching(&mut events, |e| {
        matches!(e, TransportEvent::StateChanged { state: TransportState::Connecting, reason: Some(r), .. } if r == "listening")
    })
    .await;

    let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    next_matching(&mut events, |e| is_state(e, TransportState::Connected)).await;
    first.write_all(b"hb-1").await.unwrap();
    let got = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(&got[..], b"hb-1");

    let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    next_matching(&mut events, |e| is_state(e, TransportState::Connected)).await;

    // First peer is closed by the server once replaced.
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(WAIT, first.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0);

    second.write_all(b"hb-2").await.unwrap();
    let got = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(&got[..], b"hb-2");
    assert_eq!(
        transport.peer_addr().map(|a| a.port()),
        Some(second.local_addr().unwrap().port())
    );

    transport.stop().await;
    assert!(transport.peer_addr().is_none());
}

#[tokio::test]
async fn start_twice_is_noop_and_stop_emits_stopped() {
    let port = closed_port().await;
    let mut config = TransportConfig::client("127.0.0.1", port, ChannelKind::Position);
    config.backoff = BackoffPolicy {
        initial: Duration::from_secs(30),
        max: Duration::from_secs(30),
        jitter: Duration::ZERO,
    };
    let transport = Transport::new(config);
    let mut events = transport.subscribe(64);

    transport.start();
    transport.start();
    assert!(transport.is_running());

    // Parked in a long backoff; stop must cancel the wait.
    next_matching(&mut events, |e| is_state(e, TransportState::Retrying)).await;
    tokio::time::timeout(Duration::from_secs(2), transport.stop())
        .await
        .expect("stop cancels the backoff wait");
    next_matching(&mut events, |e| is_state(e, TransportState::Stopped)).await;
    assert!(!transport.is_running());

    // Stopping again is harmless.
    transport.stop().await;
}
