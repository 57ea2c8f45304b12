//! Periodic eviction of dead connections from the host's table.
//!
//! Two policies are available:
//!
//! - [`LivenessPolicy::Heartbeat`] (default): every sweep sends a heartbeat
//!   request to each connection; sessions answer with a heartbeat reply and
//!   every inbound frame refreshes the connection's last-seen time. A
//!   connection silent for [`MISSED_HEARTBEAT_LIMIT`] intervals is evicted.
//!   Idle but healthy peers keep answering and are never evicted.
//! - [`LivenessPolicy::ReadinessProbe`]: the legacy host heuristic. A
//!   connection whose socket is not readable within the probe window is
//!   evicted. Note that an idle, healthy connection is exactly as
//!   "unreadable" as a dead one, so this policy drops quiet peers.
//!
//! The supervisor only ever evicts through [`Connection::evict`] plus
//! [`ConnectionTable::remove`]; a session removing the same entry at the
//! same moment is harmless because removal is first-wins.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::Connection;
use super::framing::Frame;
use super::table::ConnectionTable;
use crate::constants::{LIVENESS_INTERVAL, MISSED_HEARTBEAT_LIMIT, PROBE_TIMEOUT};

/// How the supervisor decides a connection is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Heartbeat request/reply exchange with a silence limit.
    #[default]
    Heartbeat,
    /// Socket readability probe with a short timeout.
    ReadinessProbe,
}

impl std::str::FromStr for LivenessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heartbeat" => Ok(Self::Heartbeat),
            "readiness_probe" | "probe" => Ok(Self::ReadinessProbe),
            other => Err(format!("unknown liveness policy '{other}'")),
        }
    }
}

/// Supervisor timing and policy.
#[derive(Debug, Clone)]
pub struct LivenessSettings {
    /// Period between sweeps.
    pub interval: Duration,
    /// Readiness probe window (readiness-probe policy only).
    pub probe_timeout: Duration,
    /// Eviction rule.
    pub policy: LivenessPolicy,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            interval: LIVENESS_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
            policy: LivenessPolicy::Heartbeat,
        }
    }
}

impl LivenessSettings {
    /// Silence allowed under the heartbeat policy before eviction.
    pub fn silence_limit(&self) -> Duration {
        self.interval * MISSED_HEARTBEAT_LIMIT
    }
}

/// Running liveness sweep task.
#[derive(Debug)]
pub struct LivenessSupervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LivenessSupervisor {
    /// Start sweeping `table` every `settings.interval`.
    ///
    /// The first sweep happens one full interval after start.
    pub fn spawn(table: ConnectionTable, settings: LivenessSettings) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run(table, settings, cancel.clone()));
        Self { cancel, handle }
    }

    async fn run(table: ConnectionTable, settings: LivenessSettings, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + settings.interval;
        let mut ticker = tokio::time::interval_at(start, settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        log::debug!(
            "[Liveness] Supervisor started ({:?} every {:?})",
            settings.policy,
            settings.interval
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = sweep(&table, &settings).await;
                    if evicted > 0 {
                        log::info!("[Liveness] Evicted {} connection(s)", evicted);
                    }
                }
            }
        }
        log::debug!("[Liveness] Supervisor stopped");
    }

    /// Stop the supervisor and wait for an in-flight sweep to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            log::warn!("[Liveness] Supervisor task failed: {e}");
        }
    }
}

/// Run one sweep over a snapshot of the table. Returns the number of
/// connections evicted by this sweep.
pub async fn sweep(table: &ConnectionTable, settings: &LivenessSettings) -> usize {
    let mut evicted = 0;
    for conn in table.snapshot() {
        if !conn.is_active() {
            continue;
        }
        let alive = match settings.policy {
            LivenessPolicy::Heartbeat => check_heartbeat(&conn, settings.silence_limit()),
            LivenessPolicy::ReadinessProbe => conn.probe_readable(settings.probe_timeout).await,
        };
        if alive {
            continue;
        }

        log::info!(
            "[Liveness] {} did not respond, removing (idle {:?})",
            conn.remote_addr(),
            conn.idle_for()
        );
        conn.evict();
        if table.remove(&conn) {
            evicted += 1;
        }
    }
    evicted
}

/// Heartbeat policy: evict after too much silence, otherwise ping.
fn check_heartbeat(conn: &Arc<Connection>, silence_limit: Duration) -> bool {
    if conn.idle_for() >= silence_limit {
        return false;
    }
    // Failing to queue means the session is already closing.
    conn.enqueue(Frame::HeartbeatRequest.encode()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::session::{FrameHandler, Session, SessionOptions};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn noop_handler() -> FrameHandler {
        Arc::new(|_conn: &Connection, _payload: &[u8]| -> anyhow::Result<()> { Ok(()) })
    }

    async fn running_session(table: &ConnectionTable) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let session = Session::new(stream, SessionOptions::default()).unwrap();
        let conn = Arc::clone(session.connection());
        table.insert(Arc::clone(&conn));
        tokio::spawn(session.run(noop_handler(), Some(table.clone())));
        (conn, client)
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("heartbeat".parse::<LivenessPolicy>(), Ok(LivenessPolicy::Heartbeat));
        assert_eq!(
            "readiness_probe".parse::<LivenessPolicy>(),
            Ok(LivenessPolicy::ReadinessProbe)
        );
        assert!("sometimes".parse::<LivenessPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_sweep_pings_fresh_connection() {
        let table = ConnectionTable::new();
        let (_conn, mut client) = running_session(&table).await;
        let settings = LivenessSettings {
            interval: Duration::from_secs(30),
            ..Default::default()
        };

        assert_eq!(sweep(&table, &settings).await, 0);

        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &Frame::HeartbeatRequest.encode()[..]);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_sweep_evicts_silent_connection() {
        let table = ConnectionTable::new();
        let (conn, _client) = running_session(&table).await;
        let settings = LivenessSettings {
            interval: Duration::from_millis(10),
            ..Default::default()
        };

        tokio::time::sleep(settings.silence_limit() + Duration::from_millis(20)).await;
        assert_eq!(sweep(&table, &settings).await, 1);
        assert!(table.is_empty());
        assert!(!conn.is_active());
    }

    #[tokio::test]
    async fn test_probe_sweep_evicts_idle_connection() {
        let table = ConnectionTable::new();
        let (_conn, _client) = running_session(&table).await;
        let settings = LivenessSettings {
            policy: LivenessPolicy::ReadinessProbe,
            probe_timeout: Duration::from_millis(10),
            ..Default::default()
        };

        // Healthy but quiet: the probe cannot tell it from a dead peer.
        assert_eq!(sweep(&table, &settings).await, 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_tolerates_concurrent_removal() {
        let table = ConnectionTable::new();
        let (conn, _client) = running_session(&table).await;
        let settings = LivenessSettings {
            policy: LivenessPolicy::ReadinessProbe,
            probe_timeout: Duration::from_millis(50),
            ..Default::default()
        };

        let sweeping = {
            let table = table.clone();
            let settings = settings.clone();
            tokio::spawn(async move { sweep(&table, &settings).await })
        };
        // Session closes and removes its own entry while the probe waits.
        conn.close();

        let evicted = sweeping.await.unwrap();
        assert!(evicted <= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(table.is_empty());
    }
}
