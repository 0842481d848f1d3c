//! # flux-core
//!
//! Shared vocabulary for the Flux assistant front end.
//!
//! - **Envelope protocol**: [`Envelope`] `{type, payload}` framing with
//!   [`Envelope::decode`] / [`Envelope::encode`]
//! - **Wire payloads**: typed inbound/outbound message bodies and
//!   [`InboundMessage`] routing
//! - **Branded IDs**: `ConnectionId`, `ChangeRequestId` as UUID v7 newtypes
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod text;

pub use envelope::{Envelope, EnvelopeError};
pub use ids::{ChangeRequestId, ConnectionId};
pub use messages::{
    ChatChunk, ChatMessage, ChatSend, ConnectionEstablished, ErrorPayload, FileDiff,
    InboundMessage, PublishStatus, Role, RouteError, SelfModDecision, SelfModDiff,
    SelfModRequest, SelfModStatus,
};
