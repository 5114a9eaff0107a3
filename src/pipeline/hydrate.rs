// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hydration: resolve the full record behind a key-only change event.

use crate::category::Category;
use crate::error::{ReplicatorError, Result};
use crate::gateway::LookupGateway;
use tracing::{debug, instrument};

/// Fetch the current state of `key` from the lookup side.
///
/// A missing record is a [`ReplicatorError::NotFound`], which is retryable:
/// the lookup side may simply not have caught up with the change yet.
/// A record whose id differs from `key` is a [`ReplicatorError::Validation`]
/// and is never written under the foreign id.
#[instrument(skip(lookup), level = "debug")]
pub async fn hydrate<L: LookupGateway + ?Sized>(lookup: &L, key: &str) -> Result<Category> {
    match lookup.record_of_id(key).await? {
        Some(category) if category.id != key => Err(ReplicatorError::Validation {
            errors: vec![format!(
                "'id' {:?} does not match event key {:?}",
                category.id, key
            )],
        }),
        Some(category) => {
            debug!(name = %category.name, "Hydrated category");
            Ok(category)
        }
        None => Err(ReplicatorError::NotFound {
            key: key.to_string(),
        }),
    }
}
