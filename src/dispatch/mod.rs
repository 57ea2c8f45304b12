//! Application layer on top of the transport.
//!
//! Frame payloads carry serialized [`Envelope`]s. Inbound envelopes are
//! routed by key through a [`DispatchRegistry`]; outbound envelopes wait in
//! an [`OutboundQueue`] until the relay drains them onto the wire.

pub mod codec;
pub mod envelope;
pub mod queue;
pub mod registry;

pub use codec::{Codec, JsonCodec};
pub use envelope::{AuthorId, Envelope};
pub use queue::OutboundQueue;
pub use registry::{DispatchRegistry, RouteHandler};
