//! Error taxonomy for the relay core.
//!
//! Transport faults are handled inside the session that hit them and are
//! only surfaced by `Connection::send`. Bind and connect failures surface to
//! the caller of `Host::start` / `Peer::connect`.

use std::io;

use thiserror::Error;

/// Errors produced by the relay core and its dispatch layer.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listening socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address the host tried to bind.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The remote host could not be reached.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Address the peer tried to reach.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// `send` was called with no active connection.
    #[error("Not connected")]
    NotConnected,

    /// No handler is registered for the envelope's routing key.
    #[error("No route registered for '{0}'")]
    UnknownRoute(String),

    /// Read or write failure on an established connection.
    #[error("Transport fault: {0}")]
    Transport(#[from] io::Error),

    /// An envelope could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A route handler reported a failure.
    #[error("Handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// A payload cannot be carried in a single frame.
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// The address string could not be interpreted.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl RelayError {
    /// Build a transport fault for a connection that is no longer active.
    pub(crate) fn closed() -> Self {
        Self::Transport(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection is closing",
        ))
    }
}

/// Result alias used throughout the relay core.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;
