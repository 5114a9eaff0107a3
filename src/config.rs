// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the category replicator.
//!
//! Configuration is passed to [`Replicator::new()`](crate::Replicator::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! Every field has a default, so an empty document is a valid config.
//!
//! # Quick Start
//!
//! ```rust
//! use category_replicator::config::ReplicatorConfig;
//!
//! let config = ReplicatorConfig {
//!     consumer_group: "catalog-replica-1".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── consumer_group: String       # Offsets are committed per group
//! ├── topics: TopicConfig          # Main topic name, partition count
//! ├── retry: RetrySettings         # Attempts and hop backoff
//! ├── consumer: ConsumerConfig     # Read batching, shutdown, rate limit
//! ├── offsets: OffsetConfig        # SQLite offset persistence
//! └── transport: TransportConfig   # Redis connection
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! consumer_group: "catalog-category-replicator"
//!
//! topics:
//!   main: "adm_videos_mysql.adm_videos.categories"
//!   partitions: 4
//!
//! retry:
//!   attempts: 4
//!   initial_delay: "1s"
//!   multiplier: 2.0
//!   max_delay: "30s"
//!
//! consumer:
//!   batch_size: 100
//!   block_timeout: "1s"
//!
//! offsets:
//!   sqlite_path: "/var/lib/catalog/offsets.db"
//!
//! transport:
//!   redis_url: "redis://redis:6379"
//! ```

use crate::error::{ReplicatorError, Result};
use crate::escalation::{EscalationPolicy, TopicChain};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main topic produced by the upstream connector.
pub const DEFAULT_MAIN_TOPIC: &str = "adm_videos_mysql.adm_videos.categories";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Replicator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Consumer group offsets are committed under.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    #[serde(default)]
    pub topics: TopicConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    #[serde(default)]
    pub offsets: OffsetConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_consumer_group() -> String {
    "catalog-category-replicator".to_string()
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            topics: TopicConfig::default(),
            retry: RetrySettings::default(),
            consumer: ConsumerConfig::default(),
            offsets: OffsetConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ReplicatorConfig {
    /// Create a fast, in-memory config for testing.
    ///
    /// Millisecond backoffs and block timeouts keep end-to-end tests quick.
    pub fn for_testing(main_topic: &str) -> Self {
        Self {
            consumer_group: "test-group".to_string(),
            topics: TopicConfig {
                main: main_topic.to_string(),
                partitions: 2,
            },
            retry: RetrySettings {
                attempts: 4,
                initial_delay: "10ms".to_string(),
                multiplier: 2.0,
                max_delay: "50ms".to_string(),
                dead_letter_missing_records: false,
            },
            consumer: ConsumerConfig {
                batch_size: 10,
                block_timeout: "20ms".to_string(),
                error_backoff: "10ms".to_string(),
                drain_timeout: "2s".to_string(),
                offset_flush_interval: "50ms".to_string(),
                ..Default::default()
            },
            offsets: OffsetConfig::in_memory(),
            transport: TransportConfig::default(),
        }
    }

    /// Check every setting, reporting the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_group.trim().is_empty() {
            return Err(ReplicatorError::Config("consumer_group must not be empty".into()));
        }
        if self.topics.main.trim().is_empty() {
            return Err(ReplicatorError::Config("topics.main must not be empty".into()));
        }
        if self.topics.partitions == 0 {
            return Err(ReplicatorError::Config("topics.partitions must be >= 1".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ReplicatorError::Config("retry.attempts must be >= 1".into()));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ReplicatorError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if self.consumer.batch_size == 0 {
            return Err(ReplicatorError::Config("consumer.batch_size must be >= 1".into()));
        }

        parse_duration("retry.initial_delay", &self.retry.initial_delay)?;
        parse_duration("retry.max_delay", &self.retry.max_delay)?;
        parse_duration("consumer.block_timeout", &self.consumer.block_timeout)?;
        parse_duration("consumer.error_backoff", &self.consumer.error_backoff)?;
        parse_duration("consumer.drain_timeout", &self.consumer.drain_timeout)?;
        let flush = parse_duration("consumer.offset_flush_interval", &self.consumer.offset_flush_interval)?;
        if flush.is_zero() {
            return Err(ReplicatorError::Config(
                "consumer.offset_flush_interval must be > 0".into(),
            ));
        }

        if let Some(path) = &self.offsets.sqlite_path {
            if path.trim().is_empty() {
                return Err(ReplicatorError::Config("offsets.sqlite_path must not be empty".into()));
            }
        }

        Ok(())
    }

    /// Topic chain for the configured main topic and attempt count.
    pub fn topic_chain(&self) -> TopicChain {
        TopicChain::for_attempts(&self.topics.main, self.retry.attempts)
    }

    /// Escalation policy built from the retry settings.
    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy::new(self.topic_chain(), self.retry.backoff())
            .with_dead_letter_missing_records(self.retry.dead_letter_missing_records)
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicatorError::Config(format!("{}: invalid duration {:?}: {}", field, value, e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TopicConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Topic naming and partitioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Main topic; retry and dead-letter topics are derived from it.
    #[serde(default = "default_main_topic")]
    pub main: String,

    /// Partitions per topic. Every topic in the chain uses the same count.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
}

fn default_main_topic() -> String {
    DEFAULT_MAIN_TOPIC.to_string()
}

fn default_partitions() -> u32 {
    4
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            main: default_main_topic(),
            partitions: default_partitions(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RetrySettings: escalation chain
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total processing attempts before dead-lettering (main + retries).
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay before the first retry topic is processed.
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    /// Growth factor of the delay per hop.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Ceiling for the per-hop delay.
    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    /// Dead-letter lookup misses immediately instead of retrying them.
    #[serde(default)]
    pub dead_letter_missing_records: bool,
}

fn default_attempts() -> u32 {
    4
}

fn default_initial_delay() -> String {
    "1s".to_string()
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> String {
    "30s".to_string()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            dead_letter_missing_records: false,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.initial_delay).unwrap_or(Duration::from_secs(1))
    }

    pub fn max_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.max_delay).unwrap_or(Duration::from_secs(30))
    }

    /// Backoff schedule between hops.
    pub fn backoff(&self) -> RetryConfig {
        RetryConfig::hops(
            self.initial_delay_duration(),
            self.multiplier,
            self.max_delay_duration(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConsumerConfig: partition workers
// ═══════════════════════════════════════════════════════════════════════════════

/// Partition worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum records fetched per read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a read waits for new records.
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// Initial pause after a failed read; doubles up to 30s.
    #[serde(default = "default_error_backoff")]
    pub error_backoff: String,

    /// How long shutdown waits for workers to finish their current record.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,

    /// How often committed offsets are written to SQLite.
    #[serde(default = "default_offset_flush_interval")]
    pub offset_flush_interval: String,

    /// Enable the shared rate limiter.
    #[serde(default)]
    pub rate_limit_enabled: bool,

    /// Maximum messages per second across all workers.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Burst allowance above the sustained rate.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_batch_size() -> usize {
    100
}

fn default_block_timeout() -> String {
    "1s".to_string()
}

fn default_error_backoff() -> String {
    "1s".to_string()
}

fn default_drain_timeout() -> String {
    "10s".to_string()
}

fn default_offset_flush_interval() -> String {
    "5s".to_string()
}

fn default_rate_limit_per_sec() -> u32 {
    1000
}

fn default_rate_limit_burst() -> u32 {
    100
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            block_timeout: default_block_timeout(),
            error_backoff: default_error_backoff(),
            drain_timeout: default_drain_timeout(),
            offset_flush_interval: default_offset_flush_interval(),
            rate_limit_enabled: false,
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl ConsumerConfig {
    pub fn block_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.block_timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn error_backoff_duration(&self) -> Duration {
        humantime::parse_duration(&self.error_backoff).unwrap_or(Duration::from_secs(1))
    }

    pub fn drain_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.drain_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn offset_flush_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.offset_flush_interval)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(5))
    }

    /// Rate limiter settings, `None` when rate limiting is disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        self.rate_limit_enabled.then(|| RateLimitConfig {
            burst_size: self.rate_limit_burst,
            refill_rate: self.rate_limit_per_sec,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OffsetConfig: SQLite persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Offset persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetConfig {
    /// SQLite database path. `None` keeps offsets in memory only.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: Option<String>,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_sqlite_path() -> Option<String> {
    Some("category_offsets.db".to_string())
}

fn default_true() -> bool {
    true
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            wal_mode: true,
        }
    }
}

impl OffsetConfig {
    /// Offsets that live only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: None,
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TransportConfig: Redis
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Approximate cap on entries per stream (`XADD MAXLEN ~`).
    #[serde(default)]
    pub stream_max_len: Option<usize>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            stream_max_len: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
