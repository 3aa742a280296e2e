//! Wire protocol for server pushes.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Kind of a server push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// First full snapshot after connecting.
    Init,
    /// Full replacement snapshot after a change.
    Update,
    /// The subscribed resource no longer exists.
    Deleted,
}

/// Untyped `{"type": ..., "content": ...}` message as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub content: Value,
}

/// Decoded server push for a resource whose snapshot type is `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Init(T),
    Update(T),
    Deleted,
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decode one text message.
    ///
    /// The `content` of a `deleted` message is ignored and may be absent.
    ///
    /// # Errors
    /// Returns error if the message is not a valid envelope or its content
    /// does not match `T`.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        Ok(match raw.kind {
            EnvelopeKind::Init => Self::Init(serde_json::from_value(raw.content)?),
            EnvelopeKind::Update => Self::Update(serde_json::from_value(raw.content)?),
            EnvelopeKind::Deleted => Self::Deleted,
        })
    }
}

impl<T: Serialize> Envelope<T> {
    /// Encode as a wire message.
    ///
    /// # Errors
    /// Returns error if `T` fails to serialize.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let raw = match self {
            Self::Init(content) => RawEnvelope {
                kind: EnvelopeKind::Init,
                content: serde_json::to_value(content)?,
            },
            Self::Update(content) => RawEnvelope {
                kind: EnvelopeKind::Update,
                content: serde_json::to_value(content)?,
            },
            Self::Deleted => RawEnvelope {
                kind: EnvelopeKind::Deleted,
                content: Value::Null,
            },
        };
        serde_json::to_string(&raw)
    }
}

impl<T> Envelope<T> {
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Init(_) => EnvelopeKind::Init,
            Self::Update(_) => EnvelopeKind::Update,
            Self::Deleted => EnvelopeKind::Deleted,
        }
    }
}
