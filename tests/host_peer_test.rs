//! End-to-end tests for the host and peer roles over loopback TCP.
//!
//! Frames are raw payloads here; envelope routing is covered in
//! `relay_test.rs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sync_relay::{Connection, FrameHandler, Host, Peer, RelayError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

/// Poll `cond` until it holds or `timeout` elapses.
async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Handler forwarding every payload (with its sender) to a channel.
fn channel_handler() -> (FrameHandler, mpsc::UnboundedReceiver<(SocketAddr, String)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: FrameHandler = Arc::new(move |conn: &Connection, payload: &[u8]| -> anyhow::Result<()> {
        let _ = tx.send((conn.remote_addr(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    });
    (handler, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<(SocketAddr, String)>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
        .1
}

fn start_host() -> (Host, mpsc::UnboundedReceiver<(SocketAddr, String)>, String) {
    let host = Host::default();
    let (handler, rx) = channel_handler();
    host.start(handler, 0).unwrap();
    let port = host.local_addr().unwrap().port();
    (host, rx, format!("127.0.0.1:{port}"))
}

async fn connect_peer(address: &str) -> (Peer, mpsc::UnboundedReceiver<(SocketAddr, String)>) {
    let peer = Peer::default();
    let (handler, rx) = channel_handler();
    peer.connect(address, handler).await.unwrap();
    (peer, rx)
}

#[tokio::test]
async fn test_peer_frame_delivered_exactly_once() {
    let (host, mut host_rx, address) = start_host();
    let (peer, _peer_rx) = connect_peer(&address).await;

    peer.send(b"hello").unwrap();

    let (from, payload) = tokio::time::timeout(WAIT, host_rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload, "hello");
    assert!(host.connections().contains(&from));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(host_rx.try_recv().is_err(), "frame delivered more than once");

    peer.disconnect().await;
    host.stop().await;
}

#[tokio::test]
async fn test_frames_split_across_writes_are_reassembled() {
    let (host, mut host_rx, address) = start_host();
    let mut raw = TcpStream::connect(&address).await.unwrap();

    for chunk in [&b"hel"[..], b"lo\rwor", b"ld\r"] {
        raw.write_all(chunk).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(recv(&mut host_rx).await, "hello");
    assert_eq!(recv(&mut host_rx).await, "world");

    host.stop().await;
}

#[tokio::test]
async fn test_broadcast_reaches_all_peers_despite_one_failure() {
    let (host, _host_rx, address) = start_host();
    let mut peers = Vec::new();
    for _ in 0..3 {
        peers.push(connect_peer(&address).await);
    }
    assert!(wait_until(WAIT, || host.connections().len() == 3).await);

    // Knock one connection out without telling the table.
    let victim = host.connections().snapshot().remove(0);
    victim.evict();

    let delivered = host.broadcast(b"ping").unwrap();
    assert_eq!(delivered, 2);

    let mut received = 0;
    for (_, rx) in &mut peers {
        if let Ok(Some((_, payload))) =
            tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
        {
            assert_eq!(payload, "ping");
            received += 1;
        }
    }
    assert_eq!(received, 2);

    for (peer, _) in &peers {
        peer.disconnect().await;
    }
    host.stop().await;
}

#[tokio::test]
async fn test_close_signal_removes_only_that_peer() {
    let (host, _host_rx, address) = start_host();
    let (leaving, _) = connect_peer(&address).await;
    let (staying, mut staying_rx) = connect_peer(&address).await;
    assert!(wait_until(WAIT, || host.connections().len() == 2).await);

    leaving.disconnect().await;
    assert!(wait_until(WAIT, || host.connections().len() == 1).await);

    host.broadcast(b"still here").unwrap();
    assert_eq!(recv(&mut staying_rx).await, "still here");
    assert!(staying.is_connected());

    staying.disconnect().await;
    host.stop().await;
}

#[tokio::test]
async fn test_host_stop_disconnects_peers() {
    let (host, _host_rx, address) = start_host();
    let (peer, _) = connect_peer(&address).await;
    assert!(wait_until(WAIT, || host.connections().len() == 1).await);

    host.stop().await;

    assert!(host.connections().is_empty());
    assert!(wait_until(WAIT, || !peer.is_connected()).await);
    assert!(matches!(peer.send(b"anyone?"), Err(RelayError::NotConnected)));
}

#[tokio::test]
async fn test_host_stop_sends_close_signal() {
    let (host, _host_rx, address) = start_host();
    let mut raw = TcpStream::connect(&address).await.unwrap();
    assert!(wait_until(WAIT, || host.connections().len() == 1).await);

    host.stop().await;

    let mut received = Vec::new();
    tokio::time::timeout(WAIT, raw.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"\r");
}

#[tokio::test]
async fn test_peer_can_reconnect() {
    let (host, mut host_rx, address) = start_host();
    let (peer, _) = connect_peer(&address).await;
    peer.send(b"first").unwrap();
    assert_eq!(recv(&mut host_rx).await, "first");

    peer.disconnect().await;
    assert!(!peer.is_connected());
    assert!(wait_until(WAIT, || host.connections().is_empty()).await);

    let (handler, _) = channel_handler();
    peer.connect(&address, handler).await.unwrap();
    peer.send(b"second").unwrap();
    assert_eq!(recv(&mut host_rx).await, "second");

    peer.disconnect().await;
    host.stop().await;
}

#[tokio::test]
async fn test_connect_replaces_existing_connection() {
    let (host, _host_rx, address) = start_host();
    let (peer, _) = connect_peer(&address).await;
    let first = peer.remote_addr();
    assert!(wait_until(WAIT, || host.connections().len() == 1).await);

    let (handler, _) = channel_handler();
    peer.connect(&address, handler).await.unwrap();

    assert!(peer.is_connected());
    assert_eq!(peer.remote_addr(), first);
    // The old connection is gone; only the new one remains.
    assert!(wait_until(WAIT, || host.connections().len() == 1).await);

    peer.disconnect().await;
    host.stop().await;
}

#[tokio::test]
async fn test_handler_reply_goes_to_sender_only() {
    let host = Host::default();
    let handler: FrameHandler = Arc::new(|conn: &Connection, payload: &[u8]| -> anyhow::Result<()> {
        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(payload);
        conn.send(&reply)?;
        Ok(())
    });
    host.start(handler, 0).unwrap();
    let address = format!("127.0.0.1:{}", host.local_addr().unwrap().port());

    let (asker, mut asker_rx) = connect_peer(&address).await;
    let (bystander, mut bystander_rx) = connect_peer(&address).await;

    asker.send(b"marco").unwrap();
    assert_eq!(recv(&mut asker_rx).await, "echo:marco");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bystander_rx.try_recv().is_err());

    asker.disconnect().await;
    bystander.disconnect().await;
    host.stop().await;
}
