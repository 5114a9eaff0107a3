// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator traits for the lookup and persistence sides.
//!
//! The replicator never talks to a datastore directly. The daemon hands it
//! a [`LookupGateway`] (where full records are read from during hydration)
//! and a [`PersistenceGateway`] (the read-optimized store being kept in
//! sync). Both are object-safe and return boxed futures so they can be
//! implemented for any backend and mocked in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use category_replicator::category::Category;
//! use category_replicator::gateway::{BoxFuture, LookupGateway};
//!
//! struct UpstreamApi;
//!
//! impl LookupGateway for UpstreamApi {
//!     fn record_of_id(&self, id: &str) -> BoxFuture<'_, Option<Category>> {
//!         let id = id.to_string();
//!         Box::pin(async move { Ok(Some(Category::active_now(id, "Movies"))) })
//!     }
//! }
//! ```

use crate::category::Category;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Simplified error for gateway operations.
#[derive(Debug, Clone)]
pub struct GatewayError(pub String);

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for crate::error::ReplicatorError {
    fn from(e: GatewayError) -> Self {
        crate::error::ReplicatorError::Gateway(e.0)
    }
}

/// Where full records are resolved from during hydration.
pub trait LookupGateway: Send + Sync + 'static {
    /// Fetch the current state of a category, `None` if it does not exist.
    fn record_of_id(&self, id: &str) -> BoxFuture<'_, Option<Category>>;
}

/// The store being replicated into.
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Insert or replace a category. Saving the same record twice is a no-op.
    fn save(&self, category: Category) -> BoxFuture<'_, Category>;

    /// Remove a category. Deleting an absent id succeeds.
    fn delete_by_id(&self, id: String) -> BoxFuture<'_, ()>;

    /// Fetch a stored category.
    fn find_by_id(&self, id: &str) -> BoxFuture<'_, Option<Category>>;
}

/// A lookup that answers every id with a "Movies" category.
///
/// Used for standalone runs where no upstream API is reachable.
#[derive(Clone, Default)]
pub struct NoOpLookup;

impl LookupGateway for NoOpLookup {
    fn record_of_id(&self, id: &str) -> BoxFuture<'_, Option<Category>> {
        let id = id.to_string();
        Box::pin(async move {
            tracing::debug!(key = %id, "NoOp: returning placeholder category");
            let mut category = Category::active_now(id, "Movies");
            category.description = Some("Some description".to_string());
            Ok(Some(category))
        })
    }
}

/// In-process category store.
///
/// Implements both sides, so it can stand in for the upstream API and for
/// the replicated store at once.
#[derive(Default)]
pub struct InMemoryCategoryStore {
    records: RwLock<HashMap<String, Category>>,
}

impl InMemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records.
    pub fn with_records(records: impl IntoIterator<Item = Category>) -> Self {
        let map = records.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl LookupGateway for InMemoryCategoryStore {
    fn record_of_id(&self, id: &str) -> BoxFuture<'_, Option<Category>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
    }
}

impl PersistenceGateway for InMemoryCategoryStore {
    fn save(&self, category: Category) -> BoxFuture<'_, Category> {
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert(category.id.clone(), category.clone());
            Ok(category)
        })
    }

    fn delete_by_id(&self, id: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.records.write().await.remove(&id);
            Ok(())
        })
    }

    fn find_by_id(&self, id: &str) -> BoxFuture<'_, Option<Category>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
    }
}
