//! Application-wide constants for sync-relay.
//!
//! Wire-level constants live here next to the timing defaults so the
//! protocol is documented in one place.
//!
//! # Categories
//!
//! - **Wire**: delimiter and reserved frame payloads
//! - **Timing**: liveness, drain and shutdown intervals
//! - **Buffers**: socket read sizing

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// Frame delimiter byte (`\r`).
///
/// Every frame on the wire is terminated by exactly one delimiter. Payloads
/// must never contain it.
pub const FRAME_DELIMITER: u8 = b'\r';

/// Default TCP port for the host listener and for peers dialing an address
/// without an explicit port.
pub const DEFAULT_PORT: u16 = 11000;

/// Heartbeat request payload (ASCII ENQ).
///
/// Sent by the host's liveness supervisor. Never delivered to frame handlers.
pub const HEARTBEAT_REQUEST: &[u8] = &[0x05];

/// Heartbeat reply payload (ASCII ACK).
///
/// Sent by a session in answer to [`HEARTBEAT_REQUEST`].
pub const HEARTBEAT_REPLY: &[u8] = &[0x06];

// ============================================================================
// Timing
// ============================================================================

/// Period between liveness sweeps.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Readiness probe window used by the readiness-probe liveness policy.
///
/// Equivalent to a 1000 microsecond readability poll.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(1);

/// Number of liveness intervals a connection may stay silent under the
/// heartbeat policy before it is evicted.
pub const MISSED_HEARTBEAT_LIMIT: u32 = 2;

/// Period between outbound queue drains.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on flushing queued frames (including the close signal) when a
/// connection is closed locally.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on waiting for session tasks to finish during `Host::stop`.
pub const SESSION_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Buffers
// ============================================================================

/// Size of a single socket read.
pub const READ_CHUNK_SIZE: usize = 1024;
