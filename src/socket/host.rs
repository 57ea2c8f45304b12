//! Host role: accepts peers and broadcasts to all of them.
//!
//! Binds a TCP listener on all IPv4 addresses and spawns an accept loop that
//! registers each connection in the [`ConnectionTable`] before launching its
//! session. The accept loop owns the session tasks, so [`Host::stop`] can
//! wait for every one of them to finish.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::framing;
use super::liveness::{LivenessSettings, LivenessSupervisor};
use super::session::{FrameHandler, Session, SessionOptions};
use super::table::ConnectionTable;
use crate::constants::SESSION_JOIN_TIMEOUT;
use crate::error::{RelayError, Result};

/// Host tunables.
#[derive(Debug, Clone, Default)]
pub struct HostSettings {
    /// Per-session settings for accepted connections.
    pub session: SessionOptions,
    /// Liveness supervisor settings.
    pub liveness: LivenessSettings,
}

/// State that exists only while the host is listening.
#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_handle: JoinHandle<()>,
    supervisor: LivenessSupervisor,
}

/// Listening side of the relay.
#[derive(Debug, Default)]
pub struct Host {
    table: ConnectionTable,
    settings: HostSettings,
    running: Mutex<Option<Running>>,
}

impl Host {
    /// Create a stopped host.
    pub fn new(settings: HostSettings) -> Self {
        Self {
            table: ConnectionTable::new(),
            settings,
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start listening on `port` (0 picks an ephemeral port).
    ///
    /// Returns immediately after the listener is bound; accepting and the
    /// liveness supervisor run as background tasks. Calling `start` while
    /// already running is a no-op. Must be called from within a tokio
    /// runtime.
    pub fn start(&self, handler: FrameHandler, port: u16) -> Result<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            log::debug!("[Host] Already running, ignoring start");
            return Ok(());
        }

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let bind_err = |source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = TcpListener::from_std(listener).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        log::info!("[Host] Listening on {}", local_addr);

        let cancel = CancellationToken::new();
        let supervisor =
            LivenessSupervisor::spawn(self.table.clone(), self.settings.liveness.clone());
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            handler,
            self.table.clone(),
            self.settings.session.clone(),
            cancel.clone(),
        ));

        *running = Some(Running {
            local_addr,
            cancel,
            accept_handle,
            supervisor,
        });
        Ok(())
    }

    /// Stop listening and close every connection.
    ///
    /// Stops the liveness supervisor, then sends each connected peer the
    /// close signal and waits (bounded) for all sessions to finish.
    /// Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        log::info!("[Host] Stopping...");

        running.supervisor.stop().await;
        running.cancel.cancel();
        if let Err(e) = running.accept_handle.await {
            log::warn!("[Host] Accept loop failed: {e}");
        }

        // Normally already empty; covers an accept loop that died early.
        for conn in self.table.drain() {
            conn.close();
        }
        log::info!("[Host] Stopped");
    }

    /// Send `payload` as one frame to every connected peer.
    ///
    /// Best effort: a connection that fails is skipped and the rest still
    /// receive the frame. Returns how many connections the frame was queued
    /// on.
    pub fn broadcast(&self, payload: &[u8]) -> Result<usize> {
        framing::validate_payload(payload)?;
        let mut delivered = 0;
        for conn in self.table.snapshot() {
            match conn.send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => log::debug!("[Host] Skipping {} in broadcast: {e}", conn.remote_addr()),
            }
        }
        Ok(delivered)
    }

    /// Whether the host is listening.
    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.local_addr)
    }

    /// The host's connection table.
    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }
}

/// Accept loop, runs as a tokio task until cancelled.
async fn accept_loop(
    listener: TcpListener,
    handler: FrameHandler,
    table: ConnectionTable,
    options: SessionOptions,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let session = match Session::new(stream, options.clone()) {
                        Ok(session) => session,
                        Err(e) => {
                            log::warn!("[Host] Dropping connection from {}: {e}", addr);
                            continue;
                        }
                    };
                    if !table.insert(Arc::clone(session.connection())) {
                        log::warn!("[Host] {} is already connected, dropping duplicate", addr);
                        continue;
                    }
                    log::info!("[Host] Connection accepted from {}", addr);
                    sessions.spawn(session.run(Arc::clone(&handler), Some(table.clone())));
                }
                Err(e) => {
                    log::error!("[Host] Accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                log_session_exit(joined);
            }
        }
    }

    drop(listener);
    for conn in table.drain() {
        conn.close();
    }

    let drain = async {
        while let Some(joined) = sessions.join_next().await {
            log_session_exit(joined);
        }
    };
    if tokio::time::timeout(SESSION_JOIN_TIMEOUT, drain).await.is_err() {
        log::warn!("[Host] Sessions did not finish in time, aborting {}", sessions.len());
        sessions.shutdown().await;
    }
}

fn log_session_exit(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            log::warn!("[Host] Session task panicked: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::connection::Connection;

    fn noop_handler() -> FrameHandler {
        Arc::new(|_conn: &Connection, _payload: &[u8]| -> anyhow::Result<()> { Ok(()) })
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let host = Host::default();
        host.start(noop_handler(), 0).unwrap();
        let first = host.local_addr().unwrap();

        host.start(noop_handler(), 0).unwrap();
        assert_eq!(host.local_addr(), Some(first));
        assert!(host.is_running());

        host.stop().await;
    }

    #[tokio::test]
    async fn test_port_in_use_is_bind_error() {
        let first = Host::default();
        first.start(noop_handler(), 0).unwrap();
        let port = first.local_addr().unwrap().port();

        let second = Host::default();
        let err = second.start(noop_handler(), port).unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }), "got {err:?}");
        assert!(!second.is_running());

        first.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let host = Host::default();
        host.stop().await;

        host.start(noop_handler(), 0).unwrap();
        host.stop().await;
        host.stop().await;
        assert!(!host.is_running());
        assert!(host.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let host = Host::default();
        host.start(noop_handler(), 0).unwrap();
        host.stop().await;
        host.start(noop_handler(), 0).unwrap();
        assert!(host.is_running());
        host.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_with_no_peers() {
        let host = Host::default();
        assert_eq!(host.broadcast(b"ping").unwrap(), 0);
        assert!(matches!(host.broadcast(b"a\rb"), Err(RelayError::InvalidFrame(_))));
    }
}
