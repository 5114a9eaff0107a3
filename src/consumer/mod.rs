// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicator engine.
//!
//! The orchestrator that ties together:
//! - The topic log via [`crate::transport::TopicLog`]
//! - The message pipeline via [`crate::pipeline::Pipeline`]
//! - The escalation policy via [`crate::escalation::EscalationPolicy`]
//! - Offset persistence via [`crate::offsets::OffsetStore`]
//!
//! # Architecture
//!
//! The engine manages the consumer lifecycle:
//! 1. Opens the offset store for its consumer group
//! 2. Spawns one worker per (topic stage × partition): main, each retry, dead-letter
//! 3. Periodically flushes committed offsets to SQLite
//! 4. Handles graceful shutdown, letting each worker finish its current record

mod types;
mod worker;

pub use types::{Alert, EngineState, HealthCheck};

use crate::config::ReplicatorConfig;
use crate::error::{ReplicatorError, Result};
use crate::escalation::EscalationPolicy;
use crate::gateway::{InMemoryCategoryStore, LookupGateway, NoOpLookup, PersistenceGateway};
use crate::metrics;
use crate::offsets::OffsetStore;
use crate::pipeline::Pipeline;
use crate::resilience::{RateLimiter, RetryConfig};
use crate::transport::{MemoryLog, RedisLog, TopicLog};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::Counters;
use worker::WorkerContext;

/// Capacity of the alert channel. Slow subscribers see `Lagged`.
const ALERT_CHANNEL_CAPACITY: usize = 1024;

/// The category replicator engine.
///
/// Consumes change events for one main topic and its retry chain, applying
/// them through the lookup and persistence gateways.
///
/// # Gateways
///
/// The engine is handed both collaborators by the embedding service:
/// - `lookup` resolves the full record for create and update events
/// - `store` receives upserts and deletes
///
/// The engine never writes to the main topic; it only republishes failed
/// messages down the retry chain.
pub struct Replicator<L = NoOpLookup, P = InMemoryCategoryStore, T = MemoryLog>
where
    L: LookupGateway,
    P: PersistenceGateway,
    T: TopicLog,
{
    config: ReplicatorConfig,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    log: Arc<T>,
    pipeline: Arc<Pipeline<L, P>>,
    policy: Arc<EscalationPolicy>,

    /// Opened on start, closed on shutdown
    offsets: Option<Arc<OffsetStore>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    alerts_tx: broadcast::Sender<Alert>,
    counters: Arc<Counters>,

    workers_expected: usize,
    workers_running: Arc<AtomicUsize>,

    /// Worker and flush task handles
    handles: Vec<JoinHandle<()>>,
}

impl Replicator<NoOpLookup, InMemoryCategoryStore, MemoryLog> {
    /// Create an engine over in-process collaborators (for testing/standalone).
    pub fn in_memory(config: ReplicatorConfig) -> Self {
        let log = Arc::new(MemoryLog::new(config.topics.partitions));
        Self::new(
            config,
            Arc::new(NoOpLookup),
            Arc::new(InMemoryCategoryStore::new()),
            log,
        )
    }
}

impl<L: LookupGateway, P: PersistenceGateway> Replicator<L, P, RedisLog> {
    /// Connect to Redis from `config.transport` and create the engine.
    pub async fn with_redis(config: ReplicatorConfig, lookup: Arc<L>, store: Arc<P>) -> Result<Self> {
        let log = RedisLog::connect(
            &config.transport.redis_url,
            config.topics.partitions,
            config.transport.stream_max_len,
            &RetryConfig::startup(),
        )
        .await?;
        Ok(Self::new(config, lookup, store, Arc::new(log)))
    }
}

impl<L: LookupGateway, P: PersistenceGateway, T: TopicLog> Replicator<L, P, T> {
    /// Create an engine.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to open offsets and begin consuming.
    pub fn new(config: ReplicatorConfig, lookup: Arc<L>, store: Arc<P>, log: Arc<T>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        let policy = Arc::new(config.escalation_policy());
        let pipeline = Arc::new(Pipeline::new(lookup, store));

        Self {
            config,
            state_tx,
            state_rx,
            log,
            pipeline,
            policy,
            offsets: None,
            shutdown_tx,
            shutdown_rx,
            alerts_tx,
            counters: Arc::new(Counters::default()),
            workers_expected: 0,
            workers_running: Arc::new(AtomicUsize::new(0)),
            handles: Vec::new(),
        }
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    /// The topic log the engine reads and republishes through.
    pub fn log(&self) -> &Arc<T> {
        &self.log
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// The offset store, once started.
    pub fn offsets(&self) -> Option<&Arc<OffsetStore>> {
        self.offsets.as_ref()
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// Subscribe to rejected and dead-lettered message alerts.
    ///
    /// Only alerts raised after subscribing are delivered.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }

    /// Health snapshot for monitoring endpoints.
    ///
    /// **Performance**: no network I/O. Collected from atomics and the
    /// offset cache.
    ///
    /// ```rust,ignore
    /// let health = replicator.health_check().await;
    /// if health.ready {
    ///     HttpResponse::Ok()
    /// } else {
    ///     HttpResponse::ServiceUnavailable()
    /// }
    /// ```
    pub async fn health_check(&self) -> HealthCheck {
        let pending = match &self.offsets {
            Some(offsets) => offsets.dirty_count().await,
            None => 0,
        };
        HealthCheck::new(
            self.state(),
            self.workers_expected,
            self.workers_running.load(Ordering::Acquire),
            &self.counters,
            pending,
        )
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Start the engine.
    ///
    /// 1. Validates configuration
    /// 2. Opens the offset store (SQLite)
    /// 3. Spawns a worker per topic stage and partition
    /// 4. Spawns the offset flush task
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicatorError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid configuration");
            self.set_state(EngineState::Failed);
            return Err(e);
        }

        info!(
            group = %self.config.consumer_group,
            main_topic = %self.config.topics.main,
            partitions = self.log.partitions(),
            attempts = self.config.retry.attempts,
            "Starting category replicator"
        );
        self.set_state(EngineState::Starting);

        let offsets = match OffsetStore::open(&self.config.offsets, &self.config.consumer_group).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "Failed to open offset store");
                self.set_state(EngineState::Failed);
                return Err(e);
            }
        };
        self.offsets = Some(Arc::clone(&offsets));

        self.spawn_workers(Arc::clone(&offsets));
        self.spawn_offset_flush_task(offsets);

        self.set_state(EngineState::Running);
        info!(workers = self.workers_expected, "Category replicator running");
        Ok(())
    }

    /// Spawn one worker per (stage, partition).
    fn spawn_workers(&mut self, offsets: Arc<OffsetStore>) {
        // Shared across every worker so the cap is global.
        let rate_limiter = self.config.consumer.rate_limit_config().map(|cfg| {
            info!(
                rate_per_sec = cfg.refill_rate,
                burst = cfg.burst_size,
                "Rate limiting enabled"
            );
            Arc::new(RateLimiter::new(cfg))
        });

        let ctx = Arc::new(WorkerContext {
            log: Arc::clone(&self.log),
            pipeline: Arc::clone(&self.pipeline),
            policy: Arc::clone(&self.policy),
            offsets,
            alerts: self.alerts_tx.clone(),
            counters: Arc::clone(&self.counters),
            rate_limiter,
            workers_running: Arc::clone(&self.workers_running),
            consumer: self.config.consumer.clone(),
        });

        let partitions = self.log.partitions();
        for stage in self.policy.chain().stages() {
            for partition in 0..partitions {
                let handle = tokio::spawn(worker::run_worker(
                    Arc::clone(&ctx),
                    stage,
                    partition,
                    self.shutdown_rx.clone(),
                ));
                self.handles.push(handle);
                self.workers_expected += 1;
            }
            debug!(stage = %stage, partitions, "Spawned stage workers");
        }
    }

    /// Spawn the task that periodically writes committed offsets to SQLite.
    fn spawn_offset_flush_task(&mut self, offsets: Arc<OffsetStore>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let flush_interval = self.config.consumer.offset_flush_interval_duration();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(flush_interval);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = offsets.flush_dirty().await {
                            warn!(error = %e, "Failed to flush offsets");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Offset flush task stopping");
                            break;
                        }
                    }
                }
            }
        });

        debug!(interval_ms = flush_interval.as_millis(), "Spawned offset flush task");
        self.handles.push(handle);
    }

    /// Shut down gracefully.
    ///
    /// 1. Signal every worker to stop
    /// 2. Wait for in-flight records to finish (bounded by `drain_timeout`)
    /// 3. Flush and close the offset store
    pub async fn shutdown(&mut self) {
        info!("Shutting down category replicator");
        self.set_state(EngineState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut self.handles);
        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for workers to finish in-flight records");
        }

        // One deadline for the whole drain, not one per task.
        let drain_timeout = self.config.consumer.drain_timeout_duration();
        match tokio::time::timeout(drain_timeout, join_all(handles)).await {
            Ok(results) => {
                for (i, result) in results.into_iter().enumerate() {
                    match result {
                        Ok(()) => debug!(task = i + 1, "Task completed gracefully"),
                        Err(e) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                    }
                }
            }
            Err(_) => {
                warn!(
                    task_count,
                    timeout_ms = drain_timeout.as_millis(),
                    "Tasks timed out during shutdown (uncommitted records will be re-read)"
                );
            }
        }

        if let Some(offsets) = self.offsets.take() {
            offsets.close().await;
        }

        metrics::set_active_workers(0);
        self.set_state(EngineState::Stopped);
        info!("Category replicator stopped");
    }
}
