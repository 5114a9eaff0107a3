// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process topic log.

use super::{compare_offsets, partition_for, stream_key, BoxFuture, LogRecord, OutboundRecord, TopicLog};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Topic log held in memory.
///
/// Offsets are `0-{n}` with `n` counting from 1 per partition. Nothing is
/// ever trimmed, which lets tests inspect every record a topic received.
pub struct MemoryLog {
    partitions: u32,
    streams: Mutex<HashMap<String, Vec<LogRecord>>>,
    appended: Notify,
}

impl MemoryLog {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
        }
    }

    /// Every record published to `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let streams = self.lock();
        (0..self.partitions)
            .filter_map(|p| streams.get(&stream_key(topic, p)))
            .flatten()
            .cloned()
            .collect()
    }

    /// Number of records published to `topic`.
    pub fn len(&self, topic: &str) -> usize {
        let streams = self.lock();
        (0..self.partitions)
            .filter_map(|p| streams.get(&stream_key(topic, p)))
            .map(Vec::len)
            .sum()
    }

    /// Offset of the newest record in a partition.
    pub fn head(&self, topic: &str, partition: u32) -> Option<String> {
        self.lock()
            .get(&stream_key(topic, partition))
            .and_then(|s| s.last())
            .map(|r| r.offset.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<LogRecord>>> {
        // A panic while holding the lock cannot leave a stream half-written.
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(&self, topic: &str, record: OutboundRecord) -> String {
        let partition = partition_for(&record.key, self.partitions);
        let mut streams = self.lock();
        let stream = streams.entry(stream_key(topic, partition)).or_default();
        let offset = format!("0-{}", stream.len() + 1);
        stream.push(LogRecord::at(topic, partition, offset.clone(), record));
        drop(streams);

        self.appended.notify_waiters();
        offset
    }

    fn read_now(&self, topic: &str, partition: u32, after: &str, max: usize) -> Vec<LogRecord> {
        let streams = self.lock();
        let Some(stream) = streams.get(&stream_key(topic, partition)) else {
            return Vec::new();
        };

        stream
            .iter()
            .filter(|r| compare_offsets(&r.offset, after).is_gt())
            .take(max)
            .cloned()
            .collect()
    }
}

impl TopicLog for MemoryLog {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    fn publish(&self, topic: &str, record: OutboundRecord) -> BoxFuture<'_, String> {
        let topic = topic.to_string();
        Box::pin(async move { Ok(self.append(&topic, record)) })
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
        Box::pin(async move {
            let deadline = Instant::now() + block;
            loop {
                // Register interest before checking so an append in between
                // is not missed.
                let notified = self.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let records = self.read_now(&topic, partition, &after, max);
                if !records.is_empty() {
                    return Ok(records);
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(Vec::new());
                }
            }
        })
    }
}
