// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Category Replicator
//!
//! Consumes change-data-capture events for catalog categories and applies
//! them to a local store, with a bounded chain of retry topics.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          category-replicator                              │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────┐    ┌─────────┐    ┌──────────────────┐   │
//! │  │ TopicLog    │───►│ decode   │───►│ hydrate │───►│ dispatch         │   │
//! │  │ (XREAD)     │    │ envelope │    │ (lookup)│    │ (save / delete)  │   │
//! │  └─────────────┘    └──────────┘    └─────────┘    └──────────────────┘   │
//! │         ▲                                 │ failure                       │
//! │         │            ┌────────────────────▼─────────────────┐             │
//! │         └────────────│ EscalationPolicy: republish original │             │
//! │                      │ bytes to the next topic in the chain │             │
//! │  ┌─────────────┐     └──────────────────────────────────────┘             │
//! │  │ OffsetStore │                                                          │
//! │  │ (SQLite)    │                                                          │
//! │  └─────────────┘                                                          │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Chain
//!
//! `main → main-retry-0 → main-retry-1 → main-retry-2 → main-dlt`
//!
//! Each failed attempt republishes the untouched message to the next topic
//! with an incremented attempt count and a backoff delay. The dead-letter
//! worker never dispatches; it alerts and acknowledges.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use category_replicator::{Replicator, ReplicatorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ReplicatorConfig::default();
//!     let mut replicator = Replicator::in_memory(config);
//!     replicator.start().await.expect("Failed to start");
//!
//!     // Runs until shutdown signal
//!     replicator.shutdown().await;
//! }
//! ```

pub mod category;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod metrics;
pub mod offsets;
pub mod pipeline;
pub mod resilience;
pub mod transport;

// Re-exports for convenience
pub use category::Category;
pub use config::{ConsumerConfig, OffsetConfig, ReplicatorConfig, RetrySettings, TopicConfig, TransportConfig};
pub use consumer::{Alert, EngineState, HealthCheck, Replicator};
pub use envelope::{decode, ChangeEvent, DecodeError, Operation, Source};
pub use error::{ReplicatorError, Result};
pub use escalation::{Escalation, EscalationPolicy, Stage, TopicChain};
pub use gateway::{GatewayError, InMemoryCategoryStore, LookupGateway, NoOpLookup, PersistenceGateway};
pub use offsets::OffsetStore;
pub use pipeline::{Ack, Pipeline};
pub use transport::{LogRecord, MemoryLog, OutboundRecord, RedisLog, TopicLog};
