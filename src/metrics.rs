// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Messages read per topic
//! - Outcomes (saved, deleted, ignored, escalated, rejected, dead-lettered)
//! - Gateway dispatch latency
//! - Escalation hops between topics
//! - Offset persistence
//! - Engine state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `category_replicator_` and follow Prometheus
//! conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use category_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_messages_read("adm_videos_mysql.adm_videos.categories", 12, Duration::from_millis(4));
//! metrics::record_escalation("adm_videos_mysql.adm_videos.categories", "adm_videos_mysql.adm_videos.categories-retry-0");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a transport connection attempt.
pub fn record_transport_connection(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("category_replicator_transport_connections_total", "status" => status).increment(1);
}

/// Record a batch read from a topic partition.
pub fn record_messages_read(topic: &str, count: usize, duration: Duration) {
    counter!("category_replicator_messages_read_total", "topic" => topic.to_string())
        .increment(count as u64);
    histogram!("category_replicator_read_duration_seconds", "topic" => topic.to_string())
        .record(duration.as_secs_f64());
}

/// Record the final outcome of handling one message.
pub fn record_outcome(topic: &str, outcome: &str) {
    counter!(
        "category_replicator_messages_processed_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record end-to-end processing time of one message.
pub fn record_processing_latency(topic: &str, duration: Duration) {
    histogram!("category_replicator_processing_duration_seconds", "topic" => topic.to_string())
        .record(duration.as_secs_f64());
}

/// Record a persistence gateway call.
pub fn record_dispatch_latency(operation: &str, duration: Duration) {
    histogram!("category_replicator_dispatch_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record a retryable failure by error kind.
pub fn record_failure(topic: &str, error_kind: &str) {
    counter!(
        "category_replicator_failures_total",
        "topic" => topic.to_string(),
        "error_type" => error_kind.to_string()
    )
    .increment(1);
}

/// Record a hop from one topic to the next in the chain.
pub fn record_escalation(from: &str, to: &str) {
    counter!(
        "category_replicator_escalations_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a message rejected without retry.
pub fn record_rejection(topic: &str, error_kind: &str) {
    counter!(
        "category_replicator_rejections_total",
        "topic" => topic.to_string(),
        "error_type" => error_kind.to_string()
    )
    .increment(1);
}

/// Record a message arriving in the dead-letter topic.
pub fn record_dead_letter(origin: &str, attempts: u32) {
    counter!("category_replicator_dead_letters_total", "origin" => origin.to_string()).increment(1);
    histogram!("category_replicator_dead_letter_attempts").record(attempts as f64);
}

/// Record a publish to a retry or dead-letter topic.
pub fn record_publish(topic: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "category_replicator_publishes_total",
        "topic" => topic.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record time a worker spent waiting for a delayed record to become due.
pub fn record_backoff_wait(topic: &str, duration: Duration) {
    histogram!("category_replicator_backoff_wait_seconds", "topic" => topic.to_string())
        .record(duration.as_secs_f64());
}

/// Record offset flush batch (debounced writes).
pub fn record_offset_flush(flushed: usize, errors: usize) {
    counter!("category_replicator_offset_flushes_total").increment(1);
    counter!("category_replicator_offset_flushed_count").increment(flushed as u64);
    if errors > 0 {
        counter!("category_replicator_offset_flush_errors_total").increment(errors as u64);
    }
}

/// Record offset store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn offset_retries_total(operation: &str) {
    counter!("category_replicator_offset_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// Gauge for number of running partition workers.
pub fn set_active_workers(count: usize) {
    gauge!("category_replicator_active_workers").set(count as f64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("category_replicator_engine_state").set(value);
}
