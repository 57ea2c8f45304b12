//! Shared per-connection handle.
//!
//! A [`Connection`] is what the rest of the crate holds on to: the host's
//! connection table, the peer, and frame handlers all see the same
//! `Arc<Connection>`. The socket itself belongs to the session loop; the
//! handle only keeps a weak reference to it, so dropping every handle never
//! keeps a dead socket open and the session is the only thing that closes it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::framing::{self, Frame};
use crate::error::{RelayError, Result};

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Reading and writing frames.
    Active = 0,
    /// Shutting down; no new frames are accepted for sending.
    Closing = 1,
    /// Session loop has exited and the socket is released.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Handle to one live stream socket.
pub struct Connection {
    remote_addr: SocketAddr,
    stream: Weak<TcpStream>,
    frame_tx: UnboundedSender<Vec<u8>>,
    state: AtomicU8,
    cancel: CancellationToken,
    opened_at: Instant,
    /// Milliseconds since `opened_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        remote_addr: SocketAddr,
        stream: &Arc<TcpStream>,
        frame_tx: UnboundedSender<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote_addr,
            stream: Arc::downgrade(stream),
            frame_tx,
            state: AtomicU8::new(ConnectionState::Active as u8),
            cancel,
            opened_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Address of the remote end.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether frames can still be sent on this connection.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Send one application payload as a single frame.
    ///
    /// The payload is terminated with the delimiter (unless it already is)
    /// and queued for the connection's writer; this never blocks on the
    /// socket.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        framing::validate_payload(payload)?;
        if !self.is_active() {
            return Err(RelayError::closed());
        }
        self.enqueue(framing::join(payload))
    }

    /// Close the connection in an orderly way.
    ///
    /// Queues the close signal, then stops the session. Frames queued before
    /// the close signal are still flushed. Calling this more than once is
    /// harmless.
    pub fn close(&self) {
        if self.begin_closing() {
            // Writer may already be gone; the socket is being released anyway.
            let _ = self.enqueue(Frame::Close.encode());
        }
        self.cancel.cancel();
    }

    /// Stop the session without sending the close signal.
    pub fn evict(&self) {
        self.begin_closing();
        self.cancel.cancel();
    }

    /// Time since the last frame arrived (or since the connection opened).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Acquire));
        self.opened_at.elapsed().saturating_sub(last)
    }

    /// Wait up to `window` for the socket to report readable (pending data
    /// or EOF).
    ///
    /// Returns `false` when the window elapses with nothing to read. A
    /// socket error counts as readable: the session will observe it on its
    /// next read.
    pub async fn probe_readable(&self, window: Duration) -> bool {
        let Some(stream) = self.stream.upgrade() else {
            return false;
        };
        match tokio::time::timeout(window, stream.ready(Interest::READABLE)).await {
            Ok(Ok(ready)) => ready.is_readable() || ready.is_read_closed(),
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }

    pub(crate) fn enqueue(&self, bytes: Vec<u8>) -> Result<()> {
        if self.frame_tx.send(bytes).is_err() {
            return Err(RelayError::closed());
        }
        Ok(())
    }

    pub(crate) fn touch(&self) {
        let now = self.opened_at.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Release);
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move `Active` to `Closing`. Returns true if this call did the move.
    pub(crate) fn begin_closing(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Active as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }
}
