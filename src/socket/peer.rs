//! Peer role: at most one outbound connection to a host.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use super::connection::Connection;
use super::session::{FrameHandler, Session, SessionOptions};
use crate::constants::{DEFAULT_PORT, SESSION_JOIN_TIMEOUT};
use crate::error::{RelayError, Result};

#[derive(Debug)]
struct Link {
    conn: Arc<Connection>,
    session: JoinHandle<()>,
}

/// Client side of the relay.
#[derive(Debug, Default)]
pub struct Peer {
    options: SessionOptions,
    link: Mutex<Option<Link>>,
}

impl Peer {
    /// Create a disconnected peer.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            link: Mutex::new(None),
        }
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to a host and start the session.
    ///
    /// `address` may be `ip`, `ip:port`, `host` or `host:port`; without a
    /// port the default port is used. Any existing connection is closed
    /// first. Returns the resolved remote address.
    pub async fn connect(&self, address: &str, handler: FrameHandler) -> Result<SocketAddr> {
        self.disconnect().await;

        let target = resolve_target(address)?;
        log::info!("[Peer] Connecting to {}", target);
        let connect_err = |source| RelayError::Connect {
            addr: target.clone(),
            source,
        };
        let stream = TcpStream::connect(target.as_str())
            .await
            .map_err(connect_err)?;
        let session = Session::new(stream, self.options.clone()).map_err(connect_err)?;

        let conn = Arc::clone(session.connection());
        let remote = conn.remote_addr();
        let handle = tokio::spawn(session.run(handler, None));

        let previous = self.lock_link().replace(Link {
            conn,
            session: handle,
        });
        // A concurrent connect won the race to this slot; keep the newest.
        if let Some(previous) = previous {
            previous.conn.close();
        }

        log::info!("[Peer] Connected to {}", remote);
        Ok(remote)
    }

    /// Send one payload to the host.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let conn = self
            .lock_link()
            .as_ref()
            .map(|link| Arc::clone(&link.conn))
            .ok_or(RelayError::NotConnected)?;
        if !conn.is_active() {
            return Err(RelayError::NotConnected);
        }
        conn.send(payload)
    }

    /// Whether an active connection exists.
    pub fn is_connected(&self) -> bool {
        self.lock_link()
            .as_ref()
            .is_some_and(|link| link.conn.is_active())
    }

    /// Remote address of the current connection.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock_link().as_ref().map(|link| link.conn.remote_addr())
    }

    /// Close the connection and wait for its session to end.
    ///
    /// Safe to call when not connected.
    pub async fn disconnect(&self) {
        let Some(link) = self.lock_link().take() else {
            return;
        };
        log::info!("[Peer] Disconnecting from {}", link.conn.remote_addr());
        link.conn.close();

        let mut session = link.session;
        if tokio::time::timeout(SESSION_JOIN_TIMEOUT, &mut session)
            .await
            .is_err()
        {
            log::warn!("[Peer] Session did not finish in time, aborting");
            session.abort();
        }
    }
}

/// Normalize an address string into `host:port`.
///
/// Accepts `ip`, `ip:port`, `[v6]:port`, `host` and `host:port`.
pub fn resolve_target(address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(RelayError::InvalidAddress("empty address".to_string()));
    }
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr.to_string());
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT).to_string());
    }
    match address.rsplit_once(':') {
        None => Ok(format!("{address}:{DEFAULT_PORT}")),
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        Some(_) => Err(RelayError::InvalidAddress(address.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> FrameHandler {
        Arc::new(|_conn: &Connection, _payload: &[u8]| -> anyhow::Result<()> { Ok(()) })
    }

    #[test]
    fn test_resolve_target_adds_default_port() {
        assert_eq!(resolve_target("10.0.0.5").unwrap(), "10.0.0.5:11000");
        assert_eq!(resolve_target(" 10.0.0.5 ").unwrap(), "10.0.0.5:11000");
        assert_eq!(resolve_target("::1").unwrap(), "[::1]:11000");
        assert_eq!(resolve_target("gm.example").unwrap(), "gm.example:11000");
    }

    #[test]
    fn test_resolve_target_keeps_explicit_port() {
        assert_eq!(resolve_target("10.0.0.5:4000").unwrap(), "10.0.0.5:4000");
        assert_eq!(resolve_target("gm.example:4000").unwrap(), "gm.example:4000");
    }

    #[test]
    fn test_resolve_target_rejects_garbage() {
        assert!(matches!(resolve_target(""), Err(RelayError::InvalidAddress(_))));
        assert!(matches!(resolve_target("host:port"), Err(RelayError::InvalidAddress(_))));
        assert!(matches!(resolve_target(":4000"), Err(RelayError::InvalidAddress(_))));
    }

    #[test]
    fn test_send_without_connect_is_not_connected() {
        let peer = Peer::default();
        assert!(matches!(peer.send(b"hello"), Err(RelayError::NotConnected)));
        assert!(!peer.is_connected());
        assert!(peer.remote_addr().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let peer = Peer::default();
        peer.disconnect().await;
        peer.disconnect().await;
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let peer = Peer::default();
        let err = peer
            .connect(&format!("127.0.0.1:{port}"), noop_handler())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Connect { .. }), "got {err:?}");
        assert!(!peer.is_connected());
    }
}
