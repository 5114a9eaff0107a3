// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Partition worker: sequential consumption of one partition of one topic.
//!
//! Each worker loops:
//! 1. Reads a batch after its committed offset
//! 2. For each record, waits until the record is due (retry hops carry a delay)
//! 3. Runs the pipeline, or only reports when consuming the dead-letter topic
//! 4. On failure, republishes the original bytes to the next topic
//! 5. Commits the offset once the outcome is acted upon
//!
//! A record is never committed before its hop is published. Publish
//! failures are retried in place until they succeed or shutdown interrupts
//! them, in which case the record stays uncommitted and is read again on
//! the next start.
//!
//! # Graceful Shutdown
//!
//! Shutdown is observed between records, while blocked on a read, while
//! waiting for a delayed record, and between publish retries. The record in
//! flight is finished; the rest of the batch is left for the next run.

use super::types::{Alert, Counters};
use crate::config::ConsumerConfig;
use crate::envelope;
use crate::escalation::{Escalation, EscalationPolicy, Stage};
use crate::gateway::{LookupGateway, PersistenceGateway};
use crate::metrics;
use crate::offsets::OffsetStore;
use crate::pipeline::Pipeline;
use crate::resilience::{RateLimiter, RetryConfig};
use crate::transport::{stream_key, LogRecord, OutboundRecord, TopicLog};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Ceiling for the pause between failed reads.
const MAX_READ_BACKOFF: Duration = Duration::from_secs(30);

/// Everything a worker shares with its siblings.
pub(crate) struct WorkerContext<L: LookupGateway, P: PersistenceGateway, T: TopicLog> {
    pub log: Arc<T>,
    pub pipeline: Arc<Pipeline<L, P>>,
    pub policy: Arc<EscalationPolicy>,
    pub offsets: Arc<OffsetStore>,
    pub alerts: broadcast::Sender<Alert>,
    pub counters: Arc<Counters>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub workers_running: Arc<AtomicUsize>,
    pub consumer: ConsumerConfig,
}

/// Outcome of handling one record.
enum Handled {
    /// Acknowledged; nothing was republished.
    Done,
    /// Republished to the next topic, then acknowledged.
    Escalated,
    /// Shutdown interrupted a republish; leave the record uncommitted.
    Interrupted,
}

/// Resolve once shutdown has been signaled (or the engine is gone).
async fn shutdown_signaled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Key a failed record is reported and routed under.
///
/// Producers may omit the transport key, so the event's own key wins when
/// the payload decodes; otherwise the transport key is all there is.
fn routing_key(record: &LogRecord) -> String {
    envelope::decode(&record.payload)
        .ok()
        .and_then(|event| event.key().map(str::to_string))
        .unwrap_or_else(|| record.key.clone())
}

/// Run the worker for one `(stage, partition)` until shutdown.
pub(crate) async fn run_worker<L, P, T>(
    ctx: Arc<WorkerContext<L, P, T>>,
    stage: Stage,
    partition: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    L: LookupGateway,
    P: PersistenceGateway,
    T: TopicLog,
{
    let topic = ctx.policy.chain().topic_for(stage);
    let span = info_span!("worker", topic = %topic, partition, stage = %stage);

    async move {
        let stream = stream_key(&topic, partition);
        let mut cursor = ctx.offsets.get_or_start(&stream).await;
        let block = ctx.consumer.block_timeout_duration();
        let batch_size = ctx.consumer.batch_size;

        let running = ctx.workers_running.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_active_workers(running);
        info!(cursor = %cursor, "Starting partition worker");

        let mut read_backoff = ctx.consumer.error_backoff_duration();

        'outer: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let read_start = Instant::now();
            let read = tokio::select! {
                biased;
                _ = shutdown_signaled(&mut shutdown_rx) => break,
                read = ctx.log.read(&topic, partition, &cursor, batch_size, block) => read,
            };

            let records = match read {
                Ok(records) => {
                    read_backoff = ctx.consumer.error_backoff_duration();
                    records
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = read_backoff.as_millis(), "Read failed, backing off");
                    tokio::select! {
                        biased;
                        _ = shutdown_signaled(&mut shutdown_rx) => break,
                        _ = tokio::time::sleep(read_backoff) => {}
                    }
                    read_backoff = std::cmp::min(read_backoff * 2, MAX_READ_BACKOFF);
                    continue;
                }
            };

            if records.is_empty() {
                continue;
            }
            metrics::record_messages_read(&topic, records.len(), read_start.elapsed());

            for record in records {
                if *shutdown_rx.borrow() {
                    break 'outer;
                }

                let wait = record.remaining_delay();
                if !wait.is_zero() {
                    debug!(offset = %record.offset, wait_ms = wait.as_millis(), "Waiting for delayed record");
                    tokio::select! {
                        biased;
                        _ = shutdown_signaled(&mut shutdown_rx) => break 'outer,
                        _ = tokio::time::sleep(wait) => {}
                    }
                    metrics::record_backoff_wait(&topic, wait);
                }

                if let Some(ref limiter) = ctx.rate_limiter {
                    limiter.acquire().await;
                }

                match handle_record(&ctx, stage, &record, &mut shutdown_rx).await {
                    Handled::Done => {
                        ctx.offsets.commit(&stream, &record.offset).await;
                    }
                    Handled::Escalated => {
                        ctx.offsets.commit(&stream, &record.offset).await;
                        // Narrow the window in which a crash would replay the hop.
                        if let Err(e) = ctx.offsets.flush_dirty().await {
                            warn!(error = %e, "Failed to flush offsets after escalation");
                        }
                    }
                    Handled::Interrupted => break 'outer,
                }
                cursor = record.offset;
            }
        }

        let running = ctx.workers_running.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_active_workers(running);
        info!(cursor = %cursor, "Partition worker stopped");
    }
    .instrument(span)
    .await
}

/// Act on one record according to the stage it was read from.
async fn handle_record<L, P, T>(
    ctx: &WorkerContext<L, P, T>,
    stage: Stage,
    record: &LogRecord,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Handled
where
    L: LookupGateway,
    P: PersistenceGateway,
    T: TopicLog,
{
    if stage.is_terminal() {
        return dead_letter(ctx, record);
    }

    let span = info_span!(
        "message",
        offset = %record.offset,
        key = %record.key,
        attempt = record.attempt
    );
    let start = Instant::now();
    let result = ctx.pipeline.process(&record.payload).instrument(span).await;
    metrics::record_processing_latency(&record.topic, start.elapsed());

    let error = match result {
        Ok(ack) => {
            debug!(offset = %record.offset, key = %record.key, outcome = ack.label(), "Message applied");
            metrics::record_outcome(&record.topic, ack.label());
            Counters::bump(&ctx.counters.processed);
            return Handled::Done;
        }
        Err(e) => e,
    };
    let key = routing_key(record);

    match ctx.policy.on_failure(stage, record.attempt, &error) {
        Escalation::Reject => {
            error!(
                offset = %record.offset,
                key = %key,
                attempt = record.attempt,
                error = %error,
                "Message rejected, not retryable"
            );
            metrics::record_rejection(&record.topic, error.kind());
            metrics::record_outcome(&record.topic, "rejected");
            Counters::bump(&ctx.counters.rejected);
            let _ = ctx.alerts.send(Alert::Rejected {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset.clone(),
                key: key.clone(),
                attempt: record.attempt,
                error_kind: error.kind(),
                reason: error.to_string(),
                payload_sha256: record.payload_sha256(),
            });
            Handled::Done
        }
        Escalation::Retry {
            topic,
            attempt,
            delay,
            ..
        } => {
            warn!(
                offset = %record.offset,
                key = %key,
                attempt = record.attempt,
                next_topic = %topic,
                delay_ms = delay.as_millis(),
                error = %error,
                "Processing failed, escalating to retry topic"
            );
            metrics::record_failure(&record.topic, error.kind());
            let hop = OutboundRecord::hop(record, key, attempt, delay, &error.to_string());
            escalate(ctx, record, &topic, hop, shutdown_rx).await
        }
        Escalation::DeadLetter { topic, attempt } => {
            warn!(
                offset = %record.offset,
                key = %key,
                attempt = record.attempt,
                next_topic = %topic,
                error = %error,
                "Processing failed, retries exhausted, dead-lettering"
            );
            metrics::record_failure(&record.topic, error.kind());
            let hop = OutboundRecord::hop(record, key, attempt, Duration::ZERO, &error.to_string());
            escalate(ctx, record, &topic, hop, shutdown_rx).await
        }
    }
}

/// Terminal handling in the dead-letter topic: report, never dispatch.
fn dead_letter<L, P, T>(ctx: &WorkerContext<L, P, T>, record: &LogRecord) -> Handled
where
    L: LookupGateway,
    P: PersistenceGateway,
    T: TopicLog,
{
    let attempts = record.attempt.saturating_sub(1);
    let key = routing_key(record);
    error!(
        offset = %record.offset,
        key = %key,
        attempts,
        origin = %record.origin,
        last_error = record.last_error.as_deref().unwrap_or(""),
        "Message dead-lettered"
    );
    metrics::record_dead_letter(&record.origin, attempts);
    metrics::record_outcome(&record.topic, "dead_lettered");
    Counters::bump(&ctx.counters.dead_lettered);

    let _ = ctx.alerts.send(Alert::DeadLettered {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset.clone(),
        key,
        attempts,
        origin: record.origin.clone(),
        last_error: record.last_error.clone(),
        payload_sha256: record.payload_sha256(),
    });
    Handled::Done
}

/// Publish a hop, retrying until it lands or shutdown interrupts.
async fn escalate<L, P, T>(
    ctx: &WorkerContext<L, P, T>,
    record: &LogRecord,
    topic: &str,
    hop: OutboundRecord,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Handled
where
    L: LookupGateway,
    P: PersistenceGateway,
    T: TopicLog,
{
    let retry = RetryConfig::republish();
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match ctx.log.publish(topic, hop.clone()).await {
            Ok(offset) => {
                debug!(topic = %topic, offset = %offset, attempt = hop.attempt, "Hop published");
                metrics::record_publish(topic, true);
                metrics::record_escalation(&record.topic, topic);
                metrics::record_outcome(&record.topic, "escalated");
                Counters::bump(&ctx.counters.escalated);
                return Handled::Escalated;
            }
            Err(e) => {
                metrics::record_publish(topic, false);
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    topic = %topic,
                    publish_attempt = attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Republish failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = shutdown_signaled(shutdown_rx) => {
                        warn!(topic = %topic, offset = %record.offset, "Shutdown during republish, record left uncommitted");
                        return Handled::Interrupted;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
