// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CDC envelope decoding.
//!
//! Turns the raw bytes of a change event into a [`ChangeEvent`]. The
//! connector strips the row images down to the record key, so `before` and
//! `after` only ever carry `{ "id": ... }`.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "payload": {
//!     "before": { "id": "abc123" },
//!     "after":  { "id": "abc123" },
//!     "source": { "name": "adm_videos_mysql", "db": "adm_videos", "table": "categories" },
//!     "op": "u"
//!   }
//! }
//! ```
//!
//! # Key Resolution
//!
//! A delete carries the key in `before` (the row is gone); everything else
//! carries it in `after`. Either side is accepted as a fallback so
//! connectors that fill both (or only one) still decode.
//!
//! Decode failures are final: retrying a malformed payload cannot help.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CDC operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Truncate,
}

impl Operation {
    /// Parse a connector operation code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Operation::Create),
            "r" => Some(Operation::Read),
            "u" => Some(Operation::Update),
            "d" => Some(Operation::Delete),
            "t" => Some(Operation::Truncate),
            _ => None,
        }
    }

    /// The connector operation code.
    pub fn code(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Read => "r",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Truncate => "t",
        }
    }

    /// Whether the full record must be looked up before dispatch.
    pub fn requires_hydration(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }

    /// Whether the operation changes the replicated store.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Delete
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Read => write!(f, "READ"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Truncate => write!(f, "TRUNCATE"),
        }
    }
}

/// Origin metadata. Informational only; never used for control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "db", alias = "database")]
    pub database: String,
    #[serde(default)]
    pub table: String,
}

/// Key-only row image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub id: String,
}

/// A decoded change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub operation: Operation,
    /// Always present and non-empty for create, update and delete.
    pub key: Option<String>,
    pub source: Source,
}

impl ChangeEvent {
    /// Build an event for the given operation and key.
    pub fn new(operation: Operation, key: impl Into<String>, source: Source) -> Self {
        Self {
            operation,
            key: Some(key.into()),
            source,
        }
    }

    /// Record key, if the event carries one.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Serialize back to the wire format, placing the key the way a
    /// connector would (`before` for deletes, `after` for inserts, both
    /// for updates).
    pub fn encode(&self) -> Vec<u8> {
        let key_ref = self.key.as_ref().map(|id| KeyRef { id: id.clone() });
        let (before, after) = match self.operation {
            Operation::Delete => (key_ref, None),
            Operation::Update => (key_ref.clone(), key_ref),
            Operation::Create | Operation::Read => (None, key_ref),
            Operation::Truncate => (None, None),
        };

        let message = WireMessage {
            payload: WirePayload {
                before,
                after,
                source: Some(self.source.clone()),
                op: self.operation.code().to_string(),
            },
        };
        // Serializing plain strings into a Vec cannot fail.
        serde_json::to_vec(&message).unwrap_or_default()
    }
}

/// Why a payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not a valid envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The operation code is not one we know.
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    /// A mutation arrived without a usable record key.
    #[error("missing record key for {operation} operation")]
    MissingKey { operation: Operation },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    payload: WirePayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePayload {
    #[serde(default)]
    before: Option<KeyRef>,
    #[serde(default)]
    after: Option<KeyRef>,
    #[serde(default)]
    source: Option<Source>,
    #[serde(alias = "operation")]
    op: String,
}

/// Decode raw message bytes into a [`ChangeEvent`].
pub fn decode(bytes: &[u8]) -> Result<ChangeEvent, DecodeError> {
    let message: WireMessage = serde_json::from_slice(bytes)?;
    let payload = message.payload;

    let operation = Operation::from_code(&payload.op)
        .ok_or_else(|| DecodeError::UnknownOperation(payload.op.clone()))?;

    let (primary, fallback) = if operation == Operation::Delete {
        (payload.before, payload.after)
    } else {
        (payload.after, payload.before)
    };

    let key = primary
        .or(fallback)
        .map(|k| k.id)
        .filter(|id| !id.trim().is_empty());

    if operation.is_mutation() && key.is_none() {
        return Err(DecodeError::MissingKey { operation });
    }

    Ok(ChangeEvent {
        operation,
        key,
        source: payload.source.unwrap_or_default(),
    })
}
