//! Sync Relay - host/peer message relay over TCP.
//!
//! One process hosts; others join as peers. Messages travel as
//! `\r`-terminated frames, each carrying a serialized [`Envelope`] that is
//! routed by key to an application handler.
//!
//! # Architecture
//!
//! - **Socket** - framing, connections, the session loop, host and peer roles
//! - **Liveness** - periodic eviction of dead peers from the host's table
//! - **Dispatch** - envelopes, codec, routing registries, outbound queues
//! - **Relay** - per-process facade tying the above together
//!
//! # Modules
//!
//! - [`socket`] - TCP transport and session layer
//! - [`dispatch`] - Envelope routing and queuing
//! - [`relay`] - Application facade
//! - [`config`] - Configuration loading/saving

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod relay;
pub mod socket;

// Re-export commonly used types
pub use config::RelayConfig;
pub use dispatch::{AuthorId, Codec, DispatchRegistry, Envelope, JsonCodec, OutboundQueue, RouteHandler};
pub use error::{RelayError, Result};
pub use relay::{DrainReport, Relay};
pub use socket::{
    Connection, ConnectionState, ConnectionTable, FrameHandler, Host, HostSettings,
    LivenessPolicy, LivenessSettings, Peer, SessionOptions,
};
