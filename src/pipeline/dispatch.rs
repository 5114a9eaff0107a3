// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation dispatch: apply a decoded change to the persistence side.

use crate::category::Category;
use crate::envelope::Operation;
use crate::error::{ReplicatorError, Result};
use crate::gateway::PersistenceGateway;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// What happened to a successfully processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Category upserted.
    Saved { key: String },
    /// Category removed (or was already absent).
    Deleted { key: String },
    /// Nothing to apply for this operation.
    Ignored { operation: Operation },
}

impl Ack {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Ack::Saved { .. } => "saved",
            Ack::Deleted { .. } => "deleted",
            Ack::Ignored { .. } => "ignored",
        }
    }
}

/// Routes operations to the persistence gateway.
pub struct Dispatcher<P: PersistenceGateway> {
    store: Arc<P>,
}

impl<P: PersistenceGateway> Dispatcher<P> {
    pub fn new(store: Arc<P>) -> Self {
        Self { store }
    }

    /// Apply one operation.
    ///
    /// Creates and updates need the hydrated `record`; it is validated before
    /// anything is written. Gateway failures are returned, never swallowed.
    #[instrument(skip(self, record), level = "debug")]
    pub async fn dispatch(
        &self,
        operation: Operation,
        key: &str,
        record: Option<Category>,
    ) -> Result<Ack> {
        match operation {
            Operation::Create | Operation::Update => {
                let category = record.ok_or_else(|| {
                    ReplicatorError::Internal(format!(
                        "{} for {} dispatched without a record",
                        operation, key
                    ))
                })?;
                category.validate()?;

                let start = Instant::now();
                let saved = self.store.save(category).await;
                metrics::record_dispatch_latency("save", start.elapsed());
                let saved = saved?;

                debug!(name = %saved.name, "Saved category");
                Ok(Ack::Saved { key: saved.id })
            }
            Operation::Delete => {
                if key.trim().is_empty() {
                    return Ok(Ack::Ignored { operation });
                }

                let start = Instant::now();
                let deleted = self.store.delete_by_id(key.to_string()).await;
                metrics::record_dispatch_latency("delete", start.elapsed());
                deleted?;

                debug!("Deleted category");
                Ok(Ack::Deleted {
                    key: key.to_string(),
                })
            }
            Operation::Read | Operation::Truncate => Ok(Ack::Ignored { operation }),
        }
    }
}
