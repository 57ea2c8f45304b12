//! Per-process relay: one host, one peer, their routes and queues.
//!
//! Application code talks to a [`Relay`] rather than to sockets. Outbound
//! envelopes are queued from any thread and written by a periodic drain
//! task; inbound frames are decoded and routed by key on the session that
//! received them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sync_relay::{Connection, Envelope, Relay, RelayConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let relay = Arc::new(Relay::new(RelayConfig::default()));
//! relay.register_host_route(
//!     "chat",
//!     Arc::new(|conn: &Connection, env: Envelope| -> anyhow::Result<()> {
//!         println!("{} says {}", conn.remote_addr(), env.payload());
//!         Ok(())
//!     }),
//! );
//! relay.start_host()?;
//! relay.spawn_drain_loop();
//! relay.queue_broadcast(relay.envelope("chat", "welcome"));
//! # relay.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::dispatch::{
    AuthorId, Codec, DispatchRegistry, Envelope, JsonCodec, OutboundQueue, RouteHandler,
};
use crate::error::{RelayError, Result};
use crate::socket::{Connection, FrameHandler, Host, Peer};

/// Envelopes taken off each queue by one drain tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Envelopes handed to the host for broadcast.
    pub broadcast: usize,
    /// Envelopes handed to the peer connection.
    pub sent: usize,
}

#[derive(Debug)]
struct DrainTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Host and peer roles plus the dispatch state they share.
pub struct Relay {
    config: RelayConfig,
    author_id: AuthorId,
    codec: Arc<dyn Codec>,
    host: Host,
    peer: Peer,
    host_routes: Arc<DispatchRegistry>,
    peer_routes: Arc<DispatchRegistry>,
    host_queue: OutboundQueue,
    peer_queue: OutboundQueue,
    drain_task: Mutex<Option<DrainTask>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("author_id", &self.author_id)
            .field("is_host", &self.is_host())
            .field("is_peer", &self.is_peer())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay using the JSON codec.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    /// Create a relay with a custom envelope codec.
    pub fn with_codec(config: RelayConfig, codec: Arc<dyn Codec>) -> Self {
        let author_id = AuthorId::generate();
        log::debug!("[Relay] Author id {}", author_id);
        Self {
            host: Host::new(config.host_settings()),
            peer: Peer::new(config.session_options()),
            config,
            author_id,
            codec,
            host_routes: Arc::new(DispatchRegistry::new("host")),
            peer_routes: Arc::new(DispatchRegistry::new("peer")),
            host_queue: OutboundQueue::new(),
            peer_queue: OutboundQueue::new(),
            drain_task: Mutex::new(None),
        }
    }

    /// This process's author id.
    pub fn author_id(&self) -> AuthorId {
        self.author_id
    }

    /// Build an envelope authored by this relay, stamped with the crate
    /// version.
    pub fn envelope(&self, routing_key: impl Into<String>, payload: impl Into<String>) -> Envelope {
        Envelope::new(routing_key, self.author_id, env!("CARGO_PKG_VERSION"), payload)
    }

    /// Active configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle envelopes with `key` that arrive at the host.
    pub fn register_host_route(&self, key: impl Into<String>, handler: RouteHandler) -> bool {
        self.host_routes.register(key, handler)
    }

    /// Handle envelopes with `key` that arrive at this peer.
    pub fn register_peer_route(&self, key: impl Into<String>, handler: RouteHandler) -> bool {
        self.peer_routes.register(key, handler)
    }

    /// Queue an envelope for broadcast to every peer of the local host.
    pub fn queue_broadcast(&self, envelope: Envelope) {
        self.host_queue.enqueue(envelope);
    }

    /// Queue an envelope for the host this peer is connected to.
    pub fn queue_send(&self, envelope: Envelope) {
        self.peer_queue.enqueue(envelope);
    }

    /// Start hosting on the configured port.
    pub fn start_host(&self) -> Result<()> {
        self.start_host_on(self.config.port)
    }

    /// Start hosting on `port` (0 picks an ephemeral port).
    pub fn start_host_on(&self, port: u16) -> Result<()> {
        let handler = inbound_handler("host", Arc::clone(&self.host_routes), Arc::clone(&self.codec));
        self.host.start(handler, port)
    }

    /// Stop hosting and close every peer connection.
    pub async fn stop_host(&self) {
        self.host.stop().await;
    }

    /// Start hosting if stopped, stop if running. Returns whether the host
    /// is running afterwards.
    pub async fn toggle_host(&self) -> Result<bool> {
        if self.host.is_running() {
            self.stop_host().await;
            Ok(false)
        } else {
            self.start_host()?;
            Ok(true)
        }
    }

    /// Connect to a host. See [`Peer::connect`] for accepted address forms.
    pub async fn connect(&self, address: &str) -> Result<SocketAddr> {
        let handler = inbound_handler("peer", Arc::clone(&self.peer_routes), Arc::clone(&self.codec));
        self.peer.connect(address, handler).await
    }

    /// Disconnect from the host, sending the close signal.
    pub async fn disconnect(&self) {
        self.peer.disconnect().await;
    }

    /// Whether the local host is listening.
    pub fn is_host(&self) -> bool {
        self.host.is_running()
    }

    /// Whether this process is connected to a host.
    pub fn is_peer(&self) -> bool {
        self.peer.is_connected()
    }

    /// The host role.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The peer role.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Run one drain tick.
    ///
    /// The host queue is drained only while hosting and the peer queue only
    /// while connected; otherwise envelopes stay queued for a later tick.
    /// Envelopes that fail to encode or send are logged and dropped.
    pub fn drain_once(&self) -> DrainReport {
        let mut report = DrainReport::default();

        if self.host.is_running() {
            report.broadcast = self.host_queue.drain_with(|envelope| {
                let result = self
                    .codec
                    .encode(&envelope)
                    .and_then(|text| self.host.broadcast(text.as_bytes()));
                match result {
                    Ok(n) => log::trace!("[Relay] Broadcast '{}' to {} peer(s)", envelope.routing_key(), n),
                    Err(e) => log::warn!("[Relay] Dropping broadcast '{}': {e}", envelope.routing_key()),
                }
            });
        }

        if self.peer.is_connected() {
            report.sent = self.peer_queue.drain_with(|envelope| {
                let result = self
                    .codec
                    .encode(&envelope)
                    .and_then(|text| self.peer.send(text.as_bytes()));
                if let Err(e) = result {
                    log::warn!("[Relay] Dropping send '{}': {e}", envelope.routing_key());
                }
            });
        }

        report
    }

    /// Start the periodic drain task. Calling it again while running is a
    /// no-op.
    ///
    /// The task holds only a weak reference, so it ends on its own once the
    /// last `Arc<Relay>` is dropped.
    pub fn spawn_drain_loop(self: &Arc<Self>) {
        let mut slot = self.lock_drain_task();
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drain_loop(
            Arc::downgrade(self),
            self.config.drain_interval(),
            cancel.clone(),
        ));
        *slot = Some(DrainTask { cancel, handle });
    }

    /// Stop the drain task, the host and the peer connection.
    pub async fn shutdown(&self) {
        let task = self.lock_drain_task().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                log::warn!("[Relay] Drain task failed: {e}");
            }
        }
        self.stop_host().await;
        self.disconnect().await;
        log::info!("[Relay] Shut down");
    }

    fn lock_drain_task(&self) -> MutexGuard<'_, Option<DrainTask>> {
        self.drain_task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain_loop(relay: Weak<Relay>, period: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(relay) = relay.upgrade() else { break };
                relay.drain_once();
            }
        }
    }
    log::debug!("[Relay] Drain loop stopped");
}

/// Frame handler that decodes envelopes and routes them through `routes`.
///
/// Undecodable frames and unknown routes are logged and skipped; a failing
/// route handler ends the session.
fn inbound_handler(
    side: &'static str,
    routes: Arc<DispatchRegistry>,
    codec: Arc<dyn Codec>,
) -> FrameHandler {
    Arc::new(move |conn: &Connection, payload: &[u8]| -> anyhow::Result<()> {
        let envelope = match codec.decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[Relay:{}] Dropping frame from {}: {e}", side, conn.remote_addr());
                return Ok(());
            }
        };
        match routes.route(conn, envelope) {
            Ok(()) => Ok(()),
            Err(RelayError::UnknownRoute(key)) => {
                log::warn!("[Relay:{}] No route for '{}' from {}", side, key, conn.remote_addr());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    })
}
