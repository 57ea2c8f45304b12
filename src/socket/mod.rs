//! TCP transport and session layer.
//!
//! One host accepts many peers; every connection speaks the same
//! delimiter-framed protocol and is driven by the same session loop.
//!
//! # Architecture
//!
//! ```text
//! Host process                                  Peer process
//! ┌────────────────────────┐                   ┌──────────────────┐
//! │ Host                   │                   │ Peer             │
//! │  TcpListener           │◄─────────────────►│  TcpStream       │
//! │  ConnectionTable       │  \r-terminated    │  Session         │
//! │  Session per peer      │  frames           │                  │
//! │  LivenessSupervisor    │                   │                  │
//! └───────────┬────────────┘                   └────────┬─────────┘
//!             │ FrameHandler(conn, payload)             │ FrameHandler
//!             ▼                                         ▼
//!        application                               application
//! ```
//!
//! # Wire Protocol
//!
//! `[payload][0x0D]`, no length prefix. An empty frame closes the session.
//! See [`framing`] for the reserved heartbeat payloads.

pub mod connection;
pub mod framing;
pub mod host;
pub mod liveness;
pub mod peer;
pub mod session;
pub mod table;

pub use connection::{Connection, ConnectionState};
pub use host::{Host, HostSettings};
pub use liveness::{LivenessPolicy, LivenessSettings, LivenessSupervisor};
pub use peer::Peer;
pub use session::{FrameHandler, Session, SessionOptions};
pub use table::ConnectionTable;
