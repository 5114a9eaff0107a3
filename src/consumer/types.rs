// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state, health and alert types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Starting
//!    │                              │
//!    │ (shutdown before start)      │ (offsets open, workers spawned)
//!    ↓                              ↓
//! Stopped ←── ShuttingDown ←──── Running
//!
//! Starting ──(bad config / offset store error)──→ Failed
//! ```
//!
//! - **Created**: after `Replicator::new()`. Nothing spawned.
//! - **Starting**: `start()` called, opening the offset store.
//! - **Running**: one worker per topic stage and partition.
//! - **ShuttingDown**: `shutdown()` called. Workers finish their current record.
//! - **Stopped**: offsets flushed, store closed. Safe to drop.
//! - **Failed**: startup failed. Check logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// State of the replicator engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Starting => write!(f, "Starting"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Operational notification for a message that will not be applied.
///
/// Alerts carry a SHA-256 fingerprint of the payload rather than the payload
/// itself; the dead-letter topic keeps the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A non-retryable failure. The message was acknowledged without a hop.
    Rejected {
        topic: String,
        partition: u32,
        offset: String,
        key: String,
        attempt: u32,
        error_kind: &'static str,
        reason: String,
        payload_sha256: String,
    },

    /// A message reached the dead-letter topic after exhausting its retries.
    DeadLettered {
        topic: String,
        partition: u32,
        offset: String,
        key: String,
        /// Processing attempts made before dead-lettering.
        attempts: u32,
        origin: String,
        last_error: Option<String>,
        payload_sha256: String,
    },
}

impl Alert {
    pub fn key(&self) -> &str {
        match self {
            Alert::Rejected { key, .. } | Alert::DeadLettered { key, .. } => key,
        }
    }
}

/// Running totals across all workers.
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) processed: AtomicU64,
    pub(crate) escalated: AtomicU64,
    pub(crate) dead_lettered: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Health snapshot for readiness and liveness endpoints.
///
/// Built from in-process state only; no I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: EngineState,
    /// Running and accepting messages.
    pub ready: bool,
    /// Ready and every partition worker is alive.
    pub healthy: bool,
    pub workers_expected: usize,
    pub workers_running: usize,
    /// Messages acknowledged after a successful dispatch.
    pub processed: u64,
    /// Messages republished to a retry or dead-letter topic.
    pub escalated: u64,
    /// Messages that arrived in the dead-letter topic.
    pub dead_lettered: u64,
    /// Messages dropped with a non-retryable error.
    pub rejected: u64,
    /// Committed offsets not yet written to SQLite.
    pub offsets_pending_flush: usize,
}

impl HealthCheck {
    pub(crate) fn new(
        state: EngineState,
        workers_expected: usize,
        workers_running: usize,
        counters: &Counters,
        offsets_pending_flush: usize,
    ) -> Self {
        let ready = state == EngineState::Running;
        Self {
            state,
            ready,
            healthy: ready && workers_running == workers_expected,
            workers_expected,
            workers_running,
            processed: Counters::load(&counters.processed),
            escalated: Counters::load(&counters.escalated),
            dead_lettered: Counters::load(&counters.dead_lettered),
            rejected: Counters::load(&counters.rejected),
            offsets_pending_flush,
        }
    }
}
