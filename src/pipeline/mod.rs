// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message processing pipeline.
//!
//! One raw message goes through three steps:
//!
//! ```text
//! bytes ──► decode ──► hydrate (create/update) ──► dispatch ──► Ack
//!             │              │                        │
//!             └── fatal      └── NotFound (retry)     └── Gateway/Validation (retry)
//! ```
//!
//! The pipeline itself holds no state between messages; retries are driven
//! by the escalation policy from whatever error it returns.

pub mod dispatch;
pub mod hydrate;

pub use dispatch::{Ack, Dispatcher};
pub use hydrate::hydrate;

use crate::envelope::{self, ChangeEvent};
use crate::error::Result;
use crate::gateway::{LookupGateway, PersistenceGateway};
use std::sync::Arc;

/// Decode, hydrate and dispatch a single message.
pub struct Pipeline<L: LookupGateway, P: PersistenceGateway> {
    lookup: Arc<L>,
    dispatcher: Dispatcher<P>,
}

impl<L: LookupGateway, P: PersistenceGateway> Pipeline<L, P> {
    pub fn new(lookup: Arc<L>, store: Arc<P>) -> Self {
        Self {
            lookup,
            dispatcher: Dispatcher::new(store),
        }
    }

    /// Process raw message bytes end to end.
    pub async fn process(&self, payload: &[u8]) -> Result<Ack> {
        let event = envelope::decode(payload)?;
        self.apply(&event).await
    }

    /// Apply an already decoded event.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<Ack> {
        let key = event.key().unwrap_or_default();

        let record = if event.operation.requires_hydration() {
            Some(hydrate(self.lookup.as_ref(), key).await?)
        } else {
            None
        };

        self.dispatcher.dispatch(event.operation, key, record).await
    }
}
