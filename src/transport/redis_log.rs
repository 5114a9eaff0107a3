// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Streams topic log.
//!
//! Each `topic:partition` pair is one Redis stream. Entries carry the
//! redelivery envelope as flat fields:
//!
//! | Field | Required | Description |
//! |-------|----------|-------------|
//! | `payload` | yes | Original message bytes |
//! | `key` | no | Routing key (category id) |
//! | `attempt` | no | Processing attempt, default 1 |
//! | `origin` | no | First topic, default the stream's topic |
//! | `not_before` | no | Earliest processing time (epoch ms), default 0 |
//! | `error` | no | Failure that caused the hop |
//!
//! Only `payload` is required, so an upstream producer can `XADD` plain
//! change events to the main topic. An entry without a payload is still
//! returned (with an empty body) so the pipeline rejects it visibly.

use super::{partition_for, stream_key, BoxFuture, LogRecord, OutboundRecord, TopicLog};
use crate::error::{ReplicatorError, Result};
use crate::metrics;
use crate::resilience::RetryConfig;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, trace, warn};

/// Topic log backed by Redis Streams.
#[derive(Clone)]
pub struct RedisLog {
    conn: ConnectionManager,
    partitions: u32,
    max_len: Option<usize>,
}

impl RedisLog {
    /// Connect with retry.
    ///
    /// Each attempt is bounded by `retry.connection_timeout`; failures back
    /// off exponentially until `retry.max_attempts` is reached.
    pub async fn connect(
        url: &str,
        partitions: u32,
        max_len: Option<usize>,
        retry: &RetryConfig,
    ) -> Result<Self> {
        info!(url = %url, partitions, "Connecting to Redis");

        let client = Client::open(url)
            .map_err(|e| ReplicatorError::Config(format!("Invalid Redis URL: {}", e)))?;

        let mut attempt = 0;
        let mut delay = retry.initial_delay;

        loop {
            attempt += 1;

            let failure = match timeout(retry.connection_timeout, client.get_connection_manager()).await {
                Ok(Ok(conn)) => {
                    metrics::record_transport_connection(true);
                    if attempt > 1 {
                        info!(attempt, "Connected to Redis after retry");
                    } else {
                        info!("Connected to Redis");
                    }
                    return Ok(Self {
                        conn,
                        partitions: partitions.max(1),
                        max_len,
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}ms", retry.connection_timeout.as_millis()),
            };

            metrics::record_transport_connection(false);

            if attempt >= retry.max_attempts {
                error!(attempt, error = %failure, "Failed to connect to Redis after max retries");
                return Err(ReplicatorError::redis_msg(
                    "CONNECT",
                    format!("Connection failed after {} attempts: {}", attempt, failure),
                ));
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis(),
                error = %failure,
                "Redis connection attempt failed, retrying"
            );

            tokio::time::sleep(delay).await;
            delay = std::cmp::min(
                Duration::from_secs_f64(delay.as_secs_f64() * retry.backoff_factor),
                retry.max_delay,
            );
        }
    }

    /// Build from an existing connection.
    pub fn from_connection(conn: ConnectionManager, partitions: u32, max_len: Option<usize>) -> Self {
        Self {
            conn,
            partitions: partitions.max(1),
            max_len,
        }
    }

    async fn xadd(&self, topic: &str, record: OutboundRecord) -> Result<String> {
        let partition = partition_for(&record.key, self.partitions);
        let key = stream_key(topic, partition);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&key);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*")
            .arg("key")
            .arg(&record.key)
            .arg("payload")
            .arg(record.payload.as_slice())
            .arg("attempt")
            .arg(record.attempt)
            .arg("not_before")
            .arg(record.not_before_ms);
        if let Some(origin) = &record.origin {
            cmd.arg("origin").arg(origin);
        }
        if let Some(last_error) = &record.last_error {
            cmd.arg("error").arg(last_error);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await.map_err(|e| ReplicatorError::Publish {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;

        trace!(stream = %key, id = %id, attempt = record.attempt, "Appended record");
        Ok(id)
    }

    async fn xread(
        &self,
        topic: &str,
        partition: u32,
        after: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<LogRecord>> {
        let key = stream_key(topic, partition);

        let mut opts = StreamReadOptions::default().count(max.max(1));
        // BLOCK 0 waits forever in Redis; a zero block means "don't wait".
        if !block.is_zero() {
            opts = opts.block(block.as_millis() as usize);
        }

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&key], &[after], &opts)
            .await
            .map_err(|e| ReplicatorError::redis("XREAD", e))?;

        let mut records = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                records.push(parse_entry(topic, partition, &entry.id, &entry.map));
            }
        }

        Ok(records)
    }
}

impl TopicLog for RedisLog {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    fn publish(&self, topic: &str, record: OutboundRecord) -> BoxFuture<'_, String> {
        let topic = topic.to_string();
        Box::pin(async move { self.xadd(&topic, record).await })
    }

    fn read(
        &self,
        topic: &str,
        partition: u32,
        after: &str,
        max: usize,
        block: Duration,
    ) -> BoxFuture<'_, Vec<LogRecord>> {
        let topic = topic.to_string();
        let after = after.to_string();
        Box::pin(async move { self.xread(&topic, partition, &after, max, block).await })
    }
}

/// Turn a stream entry into a record, filling defaults for optional fields.
fn parse_entry(
    topic: &str,
    partition: u32,
    id: &str,
    fields: &HashMap<String, redis::Value>,
) -> LogRecord {
    let payload = match get_bytes_field(fields, "payload") {
        Some(payload) => payload,
        None => {
            warn!(topic = %topic, partition, offset = %id, "Stream entry has no payload");
            Vec::new()
        }
    };

    let record = OutboundRecord {
        key: get_string_field(fields, "key").unwrap_or_default(),
        payload,
        attempt: get_string_field(fields, "attempt")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1),
        origin: get_string_field(fields, "origin"),
        not_before_ms: get_string_field(fields, "not_before")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        last_error: get_string_field(fields, "error"),
    };

    LogRecord::at(topic, partition, id.to_string(), record)
}

/// Extract a UTF-8 field from a stream entry.
fn get_string_field(fields: &HashMap<String, redis::Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract a binary field from a stream entry.
fn get_bytes_field(fields: &HashMap<String, redis::Value>, name: &str) -> Option<Vec<u8>> {
    match fields.get(name)? {
        redis::Value::BulkString(bytes) => Some(bytes.clone()),
        redis::Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}
