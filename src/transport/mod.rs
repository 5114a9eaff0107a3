// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Partitioned topic log seam.
//!
//! The replicator reads from and republishes to named topics, each split
//! into a fixed number of partitions. A record's partition is derived from
//! its key, so every hop of one key lands on the same partition index of
//! the next topic.
//!
//! Offsets are stream ids of the form `{ms}-{seq}`; `"0"` means "before the
//! first record". Reads are exclusive of the given offset.
//!
//! Two implementations ship with the crate:
//! - [`MemoryLog`]: in-process, for standalone runs and tests
//! - [`RedisLog`]: one Redis stream per `topic:partition`

mod memory;
mod redis_log;

pub use self::memory::MemoryLog;
pub use self::redis_log::RedisLog;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Type alias for boxed async futures returned by [`TopicLog`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Offset meaning "read from the beginning".
pub const START_OFFSET: &str = "0";

/// A record to append to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Routing key (the category id).
    pub key: String,
    /// Original message bytes, never modified between hops.
    pub payload: Vec<u8>,
    /// Processing attempt this record will represent (1 on the main topic).
    pub attempt: u32,
    /// Topic the message first arrived on. Defaults to the publish topic.
    pub origin: Option<String>,
    /// Earliest processing time, epoch milliseconds.
    pub not_before_ms: u64,
    /// Failure that caused this hop.
    pub last_error: Option<String>,
}

impl OutboundRecord {
    /// A fresh message, as the upstream connector would publish it.
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            attempt: 1,
            origin: None,
            not_before_ms: 0,
            last_error: None,
        }
    }

    /// The next hop of a record that failed processing, routed by `key`.
    pub fn hop(
        record: &LogRecord,
        key: impl Into<String>,
        attempt: u32,
        delay: Duration,
        error: &str,
    ) -> Self {
        Self {
            key: key.into(),
            payload: record.payload.clone(),
            attempt,
            origin: Some(record.origin.clone()),
            not_before_ms: epoch_millis().saturating_add(delay.as_millis() as u64),
            last_error: Some(error.to_string()),
        }
    }
}

/// A record read back from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
    pub origin: String,
    pub not_before_ms: u64,
    pub last_error: Option<String>,
}

impl LogRecord {
    /// Materialize an outbound record at a position in the log.
    pub fn at(topic: &str, partition: u32, offset: String, record: OutboundRecord) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            offset,
            key: record.key,
            payload: record.payload,
            attempt: record.attempt.max(1),
            origin: record.origin.unwrap_or_else(|| topic.to_string()),
            not_before_ms: record.not_before_ms,
            last_error: record.last_error,
        }
    }

    /// How long until this record may be processed.
    pub fn remaining_delay(&self) -> Duration {
        Duration::from_millis(self.not_before_ms.saturating_sub(epoch_millis()))
    }

    /// Hex SHA-256 of the payload, for alerts that must not carry the body.
    pub fn payload_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.payload))
    }
}

/// A partitioned, append-only topic log.
pub trait TopicLog: Send + Sync + 'static {
    /// Number of partitions every topic is split into.
    fn partitions(&self) -> u32;

    /// Append a record, routed to a partition by its key. Returns the offset.
    fn publish(&self, topic: &str, record: OutboundRecord) -> BoxFuture<'_, String>;

    /// Read up to `max` records after `after`, waiting up to `block` when
    /// none are available. An empty result is not an error.
    fn read(
        &self,
        topic: &str,
        partition: u32,
        after: &str,
        max: usize,
        block: Duration,
    ) -> BoxFuture<'_, Vec<LogRecord>>;
}

/// Stable partition for a key.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % partitions as u64) as u32
}

/// Storage key for one partition of a topic.
pub fn stream_key(topic: &str, partition: u32) -> String {
    format!("{}:{}", topic, partition)
}

/// Compare two stream offsets numerically.
///
/// `"1700000000000-10"` sorts after `"1700000000000-9"`; `"0"` sorts first.
pub fn compare_offsets(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> (u64, u64) {
        match s.split_once('-') {
            Some((ts, seq)) => (ts.parse().unwrap_or(0), seq.parse().unwrap_or(0)),
            None => (s.parse().unwrap_or(0), 0),
        }
    };

    parse(a).cmp(&parse(b))
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
