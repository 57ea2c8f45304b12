//! Pluggable envelope serialization.
//!
//! The transport only requires that an encoding is total, round-trips, and
//! never produces the frame delimiter. [`JsonCodec`] satisfies this because
//! JSON escapes every control character inside strings.

use super::envelope::Envelope;
use crate::constants::FRAME_DELIMITER;
use crate::error::{RelayError, Result};

/// Converts envelopes to and from frame payload text.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Serialize an envelope to a text payload.
    fn encode(&self, envelope: &Envelope) -> Result<String>;

    /// Deserialize a frame payload.
    fn decode(&self, payload: &[u8]) -> Result<Envelope>;
}

/// JSON codec (serde_json).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<String> {
        let text = serde_json::to_string(envelope).map_err(|e| RelayError::Codec(e.to_string()))?;
        if text.as_bytes().contains(&FRAME_DELIMITER) {
            return Err(RelayError::Codec("encoding contains the frame delimiter".to_string()));
        }
        Ok(text)
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(payload).map_err(|e| RelayError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::envelope::AuthorId;

    #[test]
    fn test_carriage_returns_in_payload_are_escaped() {
        let envelope = Envelope::new("notes", AuthorId::generate(), "1", "line one\r\nline two");
        let text = JsonCodec.encode(&envelope).unwrap();

        assert!(!text.contains('\r'));
        assert_eq!(JsonCodec.decode(text.as_bytes()).unwrap(), envelope);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(JsonCodec.decode(b"not json"), Err(RelayError::Codec(_))));
        assert!(matches!(JsonCodec.decode(b"{\"PackageId\":1}"), Err(RelayError::Codec(_))));
    }
}
