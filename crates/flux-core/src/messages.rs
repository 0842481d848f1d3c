//! Typed payloads for every envelope type the server understands or emits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;

/// Envelope type tags.
pub mod kinds {
    /// Client → server: start a chat completion.
    pub const CHAT_SEND: &str = "chat.send";
    /// Client → server: cancel the active chat stream.
    pub const CHAT_CANCEL: &str = "chat.cancel";
    /// Client → server: explicit self-modification request.
    pub const SELFMOD_REQUEST: &str = "selfmod.request";
    /// Client → server: approve a pending change request.
    pub const SELFMOD_APPROVE: &str = "selfmod.approve";
    /// Client → server: reject a pending change request.
    pub const SELFMOD_REJECT: &str = "selfmod.reject";

    /// Server → client: a streamed chat fragment.
    pub const CHAT_CHUNK: &str = "chat.chunk";
    /// Server → client: a proposed change set ready for review.
    pub const SELFMOD_DIFF: &str = "selfmod.diff";
    /// Server → client: publish progress for a change request.
    pub const SELFMOD_STATUS: &str = "selfmod.status";
    /// Server → client: a request could not be handled.
    pub const ERROR: &str = "error";
    /// Server → client: first frame after the upgrade.
    pub const CONNECTION_ESTABLISHED: &str = "connection.established";
}

/// Speaker of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation.
    System,
    /// The human side.
    User,
    /// The model side.
    Assistant,
}

/// One turn of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl ChatMessage {
    /// A system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── Inbound ─────────────────────────────────────────────────────────────────

/// `chat.send` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSend {
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Provider to use; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// `selfmod.request` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfModRequest {
    /// Natural-language description of the desired change.
    pub request: String,
    /// Provider to use; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// `selfmod.approve` / `selfmod.reject` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfModDecision {
    /// Target change request.
    pub request_id: String,
}

/// A routed inbound envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundMessage {
    /// `chat.send`
    ChatSend(ChatSend),
    /// `chat.cancel`
    ChatCancel,
    /// `selfmod.request`
    SelfModRequest(SelfModRequest),
    /// `selfmod.approve`
    SelfModApprove(SelfModDecision),
    /// `selfmod.reject`
    SelfModReject(SelfModDecision),
}

/// Why an envelope could not be routed.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The `type` tag is not one the server handles.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The tag is known but the payload does not match its schema.
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        /// Envelope type tag.
        kind: String,
        /// Deserialization failure.
        source: serde_json::Error,
    },
}

impl InboundMessage {
    /// Route an envelope to its typed message.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, RouteError> {
        let invalid = |source: serde_json::Error| RouteError::InvalidPayload {
            kind: envelope.kind.clone(),
            source,
        };
        match envelope.kind.as_str() {
            kinds::CHAT_SEND => envelope.payload_as().map(Self::ChatSend).map_err(invalid),
            kinds::CHAT_CANCEL => Ok(Self::ChatCancel),
            kinds::SELFMOD_REQUEST => envelope
                .payload_as()
                .map(Self::SelfModRequest)
                .map_err(invalid),
            kinds::SELFMOD_APPROVE => envelope
                .payload_as()
                .map(Self::SelfModApprove)
                .map_err(invalid),
            kinds::SELFMOD_REJECT => envelope
                .payload_as()
                .map(Self::SelfModReject)
                .map_err(invalid),
            other => Err(RouteError::UnknownMessageType(other.to_owned())),
        }
    }
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// `chat.chunk` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Text fragment; empty on the closing chunk.
    pub content: String,
    /// Whether this is the last chunk of the response.
    pub done: bool,
}

/// Unified diff for one proposed file change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Repository-relative path.
    pub path: String,
    /// Unified patch text.
    pub diff: String,
}

/// `selfmod.diff` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfModDiff {
    /// Change request awaiting review.
    pub request_id: String,
    /// Model-written summary of the change.
    pub description: String,
    /// One entry per proposed change, in proposal order.
    pub diffs: Vec<FileDiff>,
}

/// Progress reported while publishing a change request.
///
/// Distinct from the request's own review status: a request is `approved`
/// once, while publishing walks through several of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// Writing changes to the working tree.
    Applying,
    /// Remote-side git work in progress.
    Pushing,
    /// Pull request opened.
    PrCreated,
    /// Changes written locally with no remote configured.
    Applied,
    /// Request discarded.
    Rejected,
    /// A step failed; the sequence stopped.
    Error,
}

impl PublishStatus {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applying => "applying",
            Self::Pushing => "pushing",
            Self::PrCreated => "pr_created",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

/// `selfmod.status` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfModStatus {
    /// Change request being published.
    pub request_id: String,
    /// Current step.
    pub status: PublishStatus,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Pull request URL, set with `pr_created`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// `error` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Description of what went wrong.
    pub error: String,
}

/// `connection.established` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    /// Identifier assigned to this connection.
    pub connection_id: String,
}

// These bodies only hold strings, bools and enums with string tags, so
// conversion to a `Value` cannot fail.
fn to_payload<T: Serialize>(body: &T) -> Value {
    serde_json::to_value(body).unwrap_or(Value::Null)
}

impl Envelope {
    /// `chat.chunk`
    pub fn chat_chunk(content: impl Into<String>, done: bool) -> Self {
        let body = ChatChunk {
            content: content.into(),
            done,
        };
        Self::new(kinds::CHAT_CHUNK, to_payload(&body))
    }

    /// `selfmod.diff`
    pub fn selfmod_diff(body: &SelfModDiff) -> Self {
        Self::new(kinds::SELFMOD_DIFF, to_payload(body))
    }

    /// `selfmod.status`
    pub fn selfmod_status(body: &SelfModStatus) -> Self {
        Self::new(kinds::SELFMOD_STATUS, to_payload(body))
    }

    /// `error`
    pub fn error(message: impl Into<String>) -> Self {
        let body = ErrorPayload {
            error: message.into(),
        };
        Self::new(kinds::ERROR, to_payload(&body))
    }

    /// `connection.established`
    pub fn connection_established(connection_id: impl Into<String>) -> Self {
        let body = ConnectionEstablished {
            connection_id: connection_id.into(),
        };
        Self::new(kinds::CONNECTION_ESTABLISHED, to_payload(&body))
    }
}
