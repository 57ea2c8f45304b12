//! Wire protocol codec for the relay socket.
//!
//! Frames are delimiter-terminated byte runs:
//!
//! ```text
//! [payload: any bytes except 0x0D] [0x0D]
//! ```
//!
//! There is no length prefix and no handshake. Reserved payloads:
//! - empty: close signal, ends the session
//! - `0x05`: heartbeat request (liveness supervisor → connection)
//! - `0x06`: heartbeat reply (connection → supervisor)
//!
//! Everything else is an application message and is handed to the frame
//! handler unchanged.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::{FRAME_DELIMITER, HEARTBEAT_REPLY, HEARTBEAT_REQUEST};
use crate::error::{RelayError, Result};

/// A decoded frame from the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application payload, delimiter stripped.
    Data(Bytes),
    /// Empty frame: the peer is closing the session.
    Close,
    /// Liveness request; the receiving session answers with a reply.
    HeartbeatRequest,
    /// Liveness reply.
    HeartbeatReply,
}

impl Frame {
    /// Classify a raw frame payload (delimiter already removed).
    pub fn from_payload(payload: Bytes) -> Self {
        if payload.is_empty() {
            Frame::Close
        } else if payload.as_ref() == HEARTBEAT_REQUEST {
            Frame::HeartbeatRequest
        } else if payload.as_ref() == HEARTBEAT_REPLY {
            Frame::HeartbeatReply
        } else {
            Frame::Data(payload)
        }
    }

    /// Encode this frame into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Data(payload) => join(payload),
            Frame::Close => join(&[]),
            Frame::HeartbeatRequest => join(HEARTBEAT_REQUEST),
            Frame::HeartbeatReply => join(HEARTBEAT_REPLY),
        }
    }
}

/// Split a buffer into every complete frame it contains.
///
/// Returns the frame payloads (delimiters stripped) in order, and the
/// trailing bytes after the last delimiter, which may hold the start of the
/// next frame.
pub fn split(buffer: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    let mut rest = buffer;
    while let Some(pos) = rest.iter().position(|&b| b == FRAME_DELIMITER) {
        frames.push(&rest[..pos]);
        rest = &rest[pos + 1..];
    }
    (frames, rest)
}

/// Terminate a payload with exactly one delimiter.
///
/// A payload that already ends in the delimiter is returned as-is, so
/// callers may pass pre-terminated messages.
pub fn join(payload: &[u8]) -> Vec<u8> {
    if payload.last() == Some(&FRAME_DELIMITER) {
        return payload.to_vec();
    }
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload);
    buf.push(FRAME_DELIMITER);
    buf
}

/// Check that an application payload fits in exactly one data frame.
///
/// Rejects the reserved payloads (empty, heartbeat request and reply) and
/// payloads carrying a delimiter anywhere but the final byte.
pub fn validate_payload(payload: &[u8]) -> Result<()> {
    let body = match payload.split_last() {
        None => return Err(RelayError::InvalidFrame("empty payload is the close signal")),
        Some((&FRAME_DELIMITER, body)) => body,
        Some(_) => payload,
    };
    if body.is_empty() {
        return Err(RelayError::InvalidFrame("empty payload is the close signal"));
    }
    if body.contains(&FRAME_DELIMITER) {
        return Err(RelayError::InvalidFrame("payload contains the frame delimiter"));
    }
    if body == HEARTBEAT_REQUEST || body == HEARTBEAT_REPLY {
        return Err(RelayError::InvalidFrame("payload is reserved for heartbeats"));
    }
    Ok(())
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
/// A single read may carry several frames; all of them are returned before
/// more bytes are requested.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// Incomplete data is buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == FRAME_DELIMITER) {
            let payload = self.buf.split_to(pos).freeze();
            self.buf.advance(1);
            frames.push(Frame::from_payload(payload));
        }

        frames
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Bytes of the incomplete trailing frame.
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }
}
