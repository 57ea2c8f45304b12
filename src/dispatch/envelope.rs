//! Application message record carried inside a frame.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the process that authored an envelope.
///
/// Generated once per process (per [`crate::Relay`]), not per connection, so
/// a host can recognize its own messages when they come back around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(Uuid);

impl AuthorId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for AuthorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable message envelope.
///
/// Field names on the wire match the legacy mod plugin (`PackageId`,
/// `TempAuthorId`, `Version`, `SerializedMessage`) so existing peers can
/// interoperate; snake_case names are accepted when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "PackageId", alias = "routing_key")]
    routing_key: String,
    #[serde(rename = "TempAuthorId", alias = "author_id")]
    author_id: AuthorId,
    #[serde(rename = "Version", alias = "version")]
    version: String,
    #[serde(rename = "SerializedMessage", alias = "payload")]
    payload: String,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(
        routing_key: impl Into<String>,
        author_id: AuthorId,
        version: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            author_id,
            version: version.into(),
            payload: payload.into(),
        }
    }

    /// Key selecting the handler that owns this message.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Originating process.
    pub fn author_id(&self) -> AuthorId {
        self.author_id
    }

    /// Version of the producing component.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Opaque application content.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Consume the envelope, keeping the payload.
    pub fn into_payload(self) -> String {
        self.payload
    }
}
