//! Envelope framing.
//!
//! Every frame exchanged with a client is a JSON object of the shape
//! `{"type": "<dot.namespaced.tag>", "payload": <any JSON>}`. The `type`
//! selects the payload schema; nothing else is interpreted at this layer.
//! Unknown types decode fine and are left for the session handler to route.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors produced while framing envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The input was not a JSON object with a non-empty string `type`.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Serializing an envelope or payload failed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single protocol frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Dot-namespaced message tag, e.g. `chat.send`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload; `null` when the sender omitted it.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope from a tag and an already-built payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an envelope by serializing a typed payload.
    pub fn from_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Decode a frame.
    ///
    /// Rejects anything that is not a JSON object carrying a non-empty string
    /// `type`. A missing `payload` decodes as `null`. Extra keys are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::Malformed(format!("invalid JSON: {e}")))?;

        let Value::Object(mut map) = value else {
            return Err(EnvelopeError::Malformed("expected a JSON object".into()));
        };

        let kind = match map.remove("type") {
            Some(Value::String(kind)) if !kind.is_empty() => kind,
            Some(Value::String(_)) => {
                return Err(EnvelopeError::Malformed("empty type".into()));
            }
            Some(_) => return Err(EnvelopeError::Malformed("type must be a string".into())),
            None => return Err(EnvelopeError::Malformed("missing type".into())),
        };

        let payload = map.remove("payload").unwrap_or(Value::Null);
        Ok(Self { kind, payload })
    }

    /// Encode to the JSON text sent over the wire.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize the payload into a typed body.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
