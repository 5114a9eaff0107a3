// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recording gateways for testing.
//!
//! Both mocks record every call for assertions and can be scripted to fail
//! a fixed number of times (or forever) before behaving normally.

use category_replicator::gateway::{BoxFuture, GatewayError};
use category_replicator::{Category, LookupGateway, PersistenceGateway};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Remaining scripted failures. `usize::MAX` means fail forever.
struct FailureScript(AtomicUsize);

impl FailureScript {
    fn none() -> Self {
        Self(AtomicUsize::new(0))
    }

    fn set(&self, times: usize) {
        self.0.store(times, Ordering::SeqCst);
    }

    /// Consume one scripted failure, if any remain.
    fn should_fail(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

/// Mock lookup that answers from a seeded map and records every id asked for.
///
/// # Example
/// ```rust,ignore
/// let lookup = RecordingLookup::new();
/// lookup.insert(Category::active_now("abc123", "Movies")).await;
/// lookup.fail_times(2);
///
/// // Use in tests...
///
/// assert_eq!(lookup.calls().await, vec!["abc123", "abc123", "abc123"]);
/// ```
pub struct RecordingLookup {
    records: RwLock<HashMap<String, Category>>,
    calls: RwLock<Vec<String>>,
    failures: FailureScript,
}

impl RecordingLookup {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failures: FailureScript::none(),
        }
    }

    /// A lookup that knows exactly these categories.
    pub async fn with(records: impl IntoIterator<Item = Category>) -> Self {
        let lookup = Self::new();
        for record in records {
            lookup.insert(record).await;
        }
        lookup
    }

    pub async fn insert(&self, category: Category) {
        self.records.write().await.insert(category.id.clone(), category);
    }

    /// Fail the next `times` lookups with a gateway error.
    pub fn fail_times(&self, times: usize) {
        self.failures.set(times);
    }

    pub fn fail_always(&self) {
        self.failures.set(usize::MAX);
    }

    /// Ids looked up, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

impl LookupGateway for RecordingLookup {
    fn record_of_id(&self, id: &str) -> BoxFuture<'_, Option<Category>> {
        let id = id.to_string();
        Box::pin(async move {
            self.calls.write().await.push(id.clone());
            if self.failures.should_fail() {
                return Err(GatewayError(format!("lookup unavailable for {}", id)));
            }
            Ok(self.records.read().await.get(&id).cloned())
        })
    }
}

/// A recorded persistence call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Save(Category),
    Delete(String),
}

/// Mock store that records saves and deletes and keeps the resulting state.
pub struct RecordingStore {
    records: RwLock<HashMap<String, Category>>,
    calls: RwLock<Vec<StoreCall>>,
    failures: FailureScript,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failures: FailureScript::none(),
        }
    }

    /// Seed existing rows without recording calls.
    pub async fn seed(&self, category: Category) {
        self.records.write().await.insert(category.id.clone(), category);
    }

    /// Fail the next `times` writes with a gateway error.
    pub fn fail_times(&self, times: usize) {
        self.failures.set(times);
    }

    pub fn fail_always(&self) {
        self.failures.set(usize::MAX);
    }

    /// Every save and delete attempt, failed ones included.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    pub async fn saves(&self) -> Vec<Category> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                StoreCall::Save(category) => Some(category.clone()),
                StoreCall::Delete(_) => None,
            })
            .collect()
    }

    pub async fn deletes(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                StoreCall::Delete(id) => Some(id.clone()),
                StoreCall::Save(_) => None,
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Category> {
        self.records.read().await.get(id).cloned()
    }
}

impl PersistenceGateway for RecordingStore {
    fn save(&self, category: Category) -> BoxFuture<'_, Category> {
        Box::pin(async move {
            self.calls.write().await.push(StoreCall::Save(category.clone()));
            if self.failures.should_fail() {
                return Err(GatewayError(format!("store unavailable saving {}", category.id)));
            }
            self.records
                .write()
                .await
                .insert(category.id.clone(), category.clone());
            Ok(category)
        })
    }

    fn delete_by_id(&self, id: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push(StoreCall::Delete(id.clone()));
            if self.failures.should_fail() {
                return Err(GatewayError(format!("store unavailable deleting {}", id)));
            }
            self.records.write().await.remove(&id);
            Ok(())
        })
    }

    fn find_by_id(&self, id: &str) -> BoxFuture<'_, Option<Category>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
    }
}
