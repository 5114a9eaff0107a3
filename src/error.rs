// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the category replicator.
//!
//! Errors are categorized by where they occur in the pipeline and whether
//! replaying the same message later can change the outcome.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Decode` | No | Malformed envelope or unknown operation |
//! | `NotFound` | Yes | Lookup returned no record (replica may lag) |
//! | `Validation` | Yes | Hydrated category failed validation |
//! | `Gateway` | Yes | Persistence or lookup gateway failure |
//! | `Redis` | Yes | Network errors, timeouts, connection failures |
//! | `Publish` | Yes | Republishing to the next topic failed |
//! | `OffsetStore` | No | Local SQLite errors (needs operator attention) |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! [`ReplicatorError::is_retryable()`] decides whether a failed message
//! escalates to the next retry topic or is rejected outright. A decode error
//! can never succeed on replay, so it never consumes a retry slot.

use crate::envelope::DecodeError;
use thiserror::Error;

/// Result type alias for replicator operations.
pub type Result<T> = std::result::Result<T, ReplicatorError>;

/// Errors that can occur while replicating category changes.
#[derive(Error, Debug)]
pub enum ReplicatorError {
    /// The raw message could not be decoded into a change event.
    ///
    /// Not retryable - the payload is malformed at the source.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The lookup gateway has no record for the key.
    ///
    /// Retryable - the upstream read replica may not have caught up yet.
    #[error("Category not found: {key}")]
    NotFound { key: String },

    /// The hydrated category failed validation; nothing was written.
    #[error("Invalid category: {}", errors.join(", "))]
    Validation { errors: Vec<String> },

    /// A downstream gateway call failed.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Redis connection or command error.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// Republishing a message to the next topic in the chain failed.
    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    /// SQLite error during offset persistence.
    #[error("Offset store error: {0}")]
    OffsetStore(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicatorError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if replaying the message could succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Decode(_) => false,
            Self::NotFound { .. } => true,
            Self::Validation { .. } => true,
            Self::Gateway(_) => true,
            Self::Redis { .. } => true,
            Self::Publish { .. } => true,
            Self::OffsetStore(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this is a hydration miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short label for metrics and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation",
            Self::Gateway(_) => "gateway",
            Self::Redis { .. } => "redis",
            Self::Publish { .. } => "publish",
            Self::OffsetStore(_) => "offset_store",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for ReplicatorError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}
