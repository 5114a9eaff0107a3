// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end tests over the in-memory topic log.
//!
//! Each test runs a full engine (every stage and partition worker) against
//! `MemoryLog` and recording gateways, then asserts on gateway calls and on
//! what each topic of the retry chain received.
//!
//! # Test Organization
//! - `apply_*` - successful create, update, delete, read and truncate handling
//! - `retry_*` - escalation through the retry chain and dead-lettering
//! - `reject_*` - non-retryable failures
//! - `offsets_*` - acknowledgement and restart behavior

mod common;

use category_replicator::transport::{partition_for, stream_key, BoxFuture};
use category_replicator::{
    Alert, Category, LogRecord, MemoryLog, OffsetConfig, OffsetStore, Operation, OutboundRecord,
    Replicator, ReplicatorConfig, ReplicatorError, TopicLog,
};
use common::{change, main_record, wait_until, RecordingLookup, RecordingStore, StoreCall};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const MAIN: &str = "adm_videos_mysql.adm_videos.categories";
const WAIT: Duration = Duration::from_secs(5);

type TestReplicator = Replicator<RecordingLookup, RecordingStore, MemoryLog>;

fn topic(suffix: &str) -> String {
    format!("{}-{}", MAIN, suffix)
}

fn movies(id: &str) -> Category {
    let mut category = Category::active_now(id, "Movies");
    category.description = Some("Some description".to_string());
    category
}

struct Harness {
    replicator: TestReplicator,
    lookup: Arc<RecordingLookup>,
    store: Arc<RecordingStore>,
    log: Arc<MemoryLog>,
    alerts: broadcast::Receiver<Alert>,
}

impl Harness {
    async fn start(config: ReplicatorConfig, lookup: RecordingLookup) -> Self {
        Self::start_with(config, Arc::new(lookup), Arc::new(RecordingStore::new()), None).await
    }

    async fn start_with(
        config: ReplicatorConfig,
        lookup: Arc<RecordingLookup>,
        store: Arc<RecordingStore>,
        log: Option<Arc<MemoryLog>>,
    ) -> Self {
        let log = log.unwrap_or_else(|| Arc::new(MemoryLog::new(config.topics.partitions)));
        let mut replicator =
            Replicator::new(config, Arc::clone(&lookup), Arc::clone(&store), Arc::clone(&log));
        let alerts = replicator.subscribe_alerts();
        replicator.start().await.expect("replicator should start");
        Self {
            replicator,
            lookup,
            store,
            log,
            alerts,
        }
    }

    async fn produce(&self, key: &str, payload: Vec<u8>) {
        self.log
            .publish(MAIN, main_record(key, payload))
            .await
            .expect("publish to main topic");
    }

    async fn next_alert(&mut self) -> Alert {
        tokio::time::timeout(WAIT, self.alerts.recv())
            .await
            .expect("alert within timeout")
            .expect("alert channel open")
    }

    async fn wait_stored(&self, key: &str) -> bool {
        let store = &self.store;
        wait_until(WAIT, || async move { store.get(key).await.is_some() }).await
    }

    async fn wait_processed(&self, count: u64) -> bool {
        let replicator = &self.replicator;
        wait_until(WAIT, || async move {
            replicator.health_check().await.processed >= count
        })
        .await
    }
}

// =============================================================================
// Successful application
// =============================================================================

#[tokio::test]
async fn apply_create_saves_hydrated_record_once() {
    let hydrated = movies("abc123");
    let lookup = RecordingLookup::with([hydrated.clone()]).await;
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), lookup).await;

    h.produce("abc123", change(Operation::Create, "abc123")).await;

    assert!(h.wait_stored("abc123").await);
    assert_eq!(h.store.get("abc123").await, Some(hydrated));
    assert_eq!(h.store.saves().await.len(), 1);
    assert_eq!(h.lookup.calls().await, vec!["abc123"]);
    assert_eq!(h.log.len(&topic("retry-0")), 0);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn apply_update_with_movies_lookup_is_not_redelivered() {
    let lookup = RecordingLookup::with([movies("abc123")]).await;
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), lookup).await;

    h.produce("abc123", br#"{"payload":{"after":{"id":"abc123"},"op":"u"}}"#.to_vec())
        .await;

    assert!(h.wait_stored("abc123").await);

    // Several more read cycles must not replay the acknowledged message.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let saves = h.store.saves().await;
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].id, "abc123");
    assert_eq!(saves[0].name, "Movies");
    assert_eq!(h.log.len(&topic("retry-0")), 0);
    assert_eq!(h.log.len(&topic("dlt")), 0);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn apply_delete_removes_record_without_lookup() {
    let store = Arc::new(RecordingStore::new());
    store.seed(movies("abc123")).await;
    let mut h = Harness::start_with(
        ReplicatorConfig::for_testing(MAIN),
        Arc::new(RecordingLookup::new()),
        Arc::clone(&store),
        None,
    )
    .await;

    h.produce("abc123", change(Operation::Delete, "abc123")).await;

    assert!(h.wait_processed(1).await);
    assert!(h.store.get("abc123").await.is_none());
    assert_eq!(h.store.deletes().await, vec!["abc123"]);
    assert_eq!(h.lookup.call_count().await, 0);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn apply_delete_with_key_in_after_image() {
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), RecordingLookup::new()).await;

    h.produce("abc123", br#"{"payload":{"op":"d","after":{"id":"abc123"}}}"#.to_vec())
        .await;

    assert!(h.wait_processed(1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.store.calls().await, vec![StoreCall::Delete("abc123".to_string())]);
    assert_eq!(h.lookup.call_count().await, 0);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn apply_delete_of_absent_key_succeeds() {
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), RecordingLookup::new()).await;

    h.produce("ghost", change(Operation::Delete, "ghost")).await;

    assert!(h.wait_processed(1).await);
    assert_eq!(h.store.deletes().await, vec!["ghost"]);
    assert_eq!(h.log.len(&topic("retry-0")), 0);
    assert_eq!(h.replicator.health_check().await.rejected, 0);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn apply_read_and_truncate_never_touch_the_store() {
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), RecordingLookup::new()).await;

    h.produce("abc123", change(Operation::Read, "abc123")).await;
    h.produce("", change(Operation::Truncate, "")).await;

    assert!(h.wait_processed(2).await);
    assert!(h.store.calls().await.is_empty());
    assert_eq!(h.lookup.call_count().await, 0);
    assert_eq!(h.log.len(&topic("retry-0")), 0);

    h.replicator.shutdown().await;
}

// =============================================================================
// Retry chain
// =============================================================================

#[tokio::test]
async fn retry_persistent_failure_dead_letters_once() {
    let store = Arc::new(RecordingStore::new());
    store.fail_always();
    let mut h = Harness::start_with(
        ReplicatorConfig::for_testing(MAIN),
        Arc::new(RecordingLookup::with([movies("abc123")]).await),
        Arc::clone(&store),
        None,
    )
    .await;

    let payload = change(Operation::Create, "abc123");
    h.produce("abc123", payload.clone()).await;

    match h.next_alert().await {
        Alert::DeadLettered {
            topic: alert_topic,
            key,
            attempts,
            origin,
            last_error,
            ..
        } => {
            assert_eq!(alert_topic, topic("dlt"));
            assert_eq!(key, "abc123");
            assert_eq!(attempts, 4);
            assert_eq!(origin, MAIN);
            assert!(last_error.unwrap_or_default().contains("store unavailable"));
        }
        other => panic!("Expected DeadLettered alert, got {:?}", other),
    }

    // One dispatch attempt per topic, none from the dead-letter topic.
    assert_eq!(h.store.saves().await.len(), 4);
    assert_eq!(h.log.len(&topic("retry-0")), 1);
    assert_eq!(h.log.len(&topic("retry-1")), 1);
    assert_eq!(h.log.len(&topic("retry-2")), 1);
    assert_eq!(h.log.len(&topic("dlt")), 1);

    // The dead-letter record carries the untouched original bytes.
    let dead = h.log.records(&topic("dlt"));
    assert_eq!(dead[0].payload, payload);
    assert_eq!(dead[0].attempt, 5);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.store.saves().await.len(), 4);
    assert_eq!(h.log.len(&topic("dlt")), 1);
    assert_eq!(h.replicator.health_check().await.dead_lettered, 1);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_fail_three_times_then_succeed() {
    let store = Arc::new(RecordingStore::new());
    store.fail_times(3);
    let mut h = Harness::start_with(
        ReplicatorConfig::for_testing(MAIN),
        Arc::new(RecordingLookup::with([movies("abc123")]).await),
        Arc::clone(&store),
        None,
    )
    .await;

    h.produce("abc123", change(Operation::Update, "abc123")).await;

    assert!(h.wait_stored("abc123").await);
    assert_eq!(h.store.saves().await.len(), 4);

    let visited: Vec<(String, u32)> = ["retry-0", "retry-1", "retry-2"]
        .iter()
        .flat_map(|suffix| h.log.records(&topic(suffix)))
        .map(|r| (r.topic, r.attempt))
        .collect();
    assert_eq!(
        visited,
        vec![(topic("retry-0"), 2), (topic("retry-1"), 3), (topic("retry-2"), 4)]
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.log.len(&topic("dlt")), 0);
    assert_eq!(h.replicator.health_check().await.dead_lettered, 0);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_hops_keep_key_partition_and_payload() {
    let lookup = RecordingLookup::with([movies("key-7")]).await;
    lookup.fail_times(1);
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), lookup).await;

    h.produce("key-7", change(Operation::Create, "key-7")).await;

    assert!(h.wait_stored("key-7").await);

    let originals = h.log.records(MAIN);
    let hops = h.log.records(&topic("retry-0"));
    assert_eq!(hops.len(), 1);
    assert_eq!(hops[0].key, originals[0].key);
    assert_eq!(hops[0].partition, originals[0].partition);
    assert_eq!(hops[0].payload, originals[0].payload);
    assert_eq!(hops[0].origin, MAIN);
    assert!(hops[0].not_before_ms > 0);
    assert!(hops[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("lookup unavailable"));

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_keyless_message_hops_by_record_id() {
    const PARTITIONS: u32 = 8;
    let id = (0..100)
        .map(|i| format!("id-{}", i))
        .find(|id| partition_for(id, PARTITIONS) != partition_for("", PARTITIONS))
        .expect("some id routes away from the empty key");

    let mut config = ReplicatorConfig::for_testing(MAIN);
    config.topics.partitions = PARTITIONS;
    let store = Arc::new(RecordingStore::new());
    store.fail_always();
    let mut h = Harness::start_with(
        config,
        Arc::new(RecordingLookup::with([movies(&id)]).await),
        Arc::clone(&store),
        None,
    )
    .await;

    // Producer entry without a transport key.
    h.log
        .publish(MAIN, main_record("", change(Operation::Create, &id)))
        .await
        .expect("publish to main topic");

    match h.next_alert().await {
        Alert::DeadLettered { key, partition, .. } => {
            assert_eq!(key, id);
            assert_eq!(partition, partition_for(&id, PARTITIONS));
        }
        other => panic!("Expected DeadLettered alert, got {:?}", other),
    }

    for suffix in ["retry-0", "retry-1", "retry-2", "dlt"] {
        let hops = h.log.records(&topic(suffix));
        assert_eq!(hops.len(), 1, "{}", suffix);
        assert_eq!(hops[0].key, id);
        assert_eq!(hops[0].partition, partition_for(&id, PARTITIONS));
    }

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_missing_record_walks_the_chain_by_default() {
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), RecordingLookup::new()).await;

    h.produce("missing", change(Operation::Create, "missing")).await;

    match h.next_alert().await {
        Alert::DeadLettered { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("Expected DeadLettered alert, got {:?}", other),
    }
    assert_eq!(h.lookup.call_count().await, 4);
    assert!(h.store.calls().await.is_empty());

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_missing_record_dead_letters_directly_when_configured() {
    let mut config = ReplicatorConfig::for_testing(MAIN);
    config.retry.dead_letter_missing_records = true;
    let mut h = Harness::start(config, RecordingLookup::new()).await;

    h.produce("missing", change(Operation::Update, "missing")).await;

    match h.next_alert().await {
        Alert::DeadLettered { attempts, last_error, .. } => {
            assert_eq!(attempts, 1);
            assert!(last_error.unwrap_or_default().contains("not found"));
        }
        other => panic!("Expected DeadLettered alert, got {:?}", other),
    }
    assert_eq!(h.lookup.call_count().await, 1);
    assert_eq!(h.log.len(&topic("retry-0")), 0);
    assert_eq!(h.log.len(&topic("dlt")), 1);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_invalid_hydrated_record_is_never_saved() {
    let mut invalid = movies("abc123");
    invalid.name = "  ".to_string();
    let lookup = RecordingLookup::with([invalid]).await;
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), lookup).await;

    h.produce("abc123", change(Operation::Create, "abc123")).await;

    match h.next_alert().await {
        Alert::DeadLettered { last_error, .. } => {
            assert!(last_error
                .unwrap_or_default()
                .contains("'name' should not be empty"));
        }
        other => panic!("Expected DeadLettered alert, got {:?}", other),
    }
    assert!(h.store.saves().await.is_empty());

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn retry_single_attempt_goes_straight_to_dead_letter() {
    let mut config = ReplicatorConfig::for_testing(MAIN);
    config.retry.attempts = 1;
    let store = Arc::new(RecordingStore::new());
    store.fail_always();
    let mut h = Harness::start_with(
        config,
        Arc::new(RecordingLookup::with([movies("abc123")]).await),
        Arc::clone(&store),
        None,
    )
    .await;

    h.produce("abc123", change(Operation::Create, "abc123")).await;

    match h.next_alert().await {
        Alert::DeadLettered { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("Expected DeadLettered alert, got {:?}", other),
    }
    assert_eq!(h.store.saves().await.len(), 1);

    h.replicator.shutdown().await;
}

// =============================================================================
// Rejection
// =============================================================================

#[tokio::test]
async fn reject_malformed_envelope_never_retries() {
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), RecordingLookup::new()).await;

    h.produce("abc123", b"not json at all".to_vec()).await;

    match h.next_alert().await {
        Alert::Rejected {
            topic: alert_topic,
            error_kind,
            attempt,
            payload_sha256,
            ..
        } => {
            assert_eq!(alert_topic, MAIN);
            assert_eq!(error_kind, "decode");
            assert_eq!(attempt, 1);
            assert_eq!(payload_sha256, h.log.records(MAIN)[0].payload_sha256());
        }
        other => panic!("Expected Rejected alert, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for suffix in ["retry-0", "retry-1", "retry-2", "dlt"] {
        assert_eq!(h.log.len(&topic(suffix)), 0, "{} must stay empty", suffix);
    }
    assert!(h.store.calls().await.is_empty());
    assert_eq!(h.replicator.health_check().await.rejected, 1);

    h.replicator.shutdown().await;
}

#[tokio::test]
async fn reject_unknown_operation_and_missing_key() {
    let mut h = Harness::start(ReplicatorConfig::for_testing(MAIN), RecordingLookup::new()).await;

    h.produce("a", br#"{"payload":{"after":{"id":"a"},"op":"x"}}"#.to_vec())
        .await;
    h.produce("a", br#"{"payload":{"before":null,"after":null,"op":"c"}}"#.to_vec())
        .await;

    for _ in 0..2 {
        match h.next_alert().await {
            Alert::Rejected { error_kind, .. } => assert_eq!(error_kind, "decode"),
            other => panic!("Expected Rejected alert, got {:?}", other),
        }
    }
    assert_eq!(h.log.len(&topic("retry-0")), 0);
    assert_eq!(h.lookup.call_count().await, 0);

    h.replicator.shutdown().await;
}

// =============================================================================
// Offsets and restart
// =============================================================================

fn file_config(dir: &tempfile::TempDir) -> ReplicatorConfig {
    let mut config = ReplicatorConfig::for_testing(MAIN);
    config.offsets = OffsetConfig {
        sqlite_path: Some(dir.path().join("offsets.db").to_string_lossy().into_owned()),
        wal_mode: true,
    };
    config
}

#[tokio::test]
async fn offsets_acknowledged_messages_are_not_replayed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(RecordingLookup::with([movies("abc123")]).await);
    let store = Arc::new(RecordingStore::new());
    let log = Arc::new(MemoryLog::new(2));

    let mut first = Harness::start_with(
        file_config(&dir),
        Arc::clone(&lookup),
        Arc::clone(&store),
        Some(Arc::clone(&log)),
    )
    .await;
    first.produce("abc123", change(Operation::Update, "abc123")).await;
    assert!(first.wait_processed(1).await);
    first.replicator.shutdown().await;

    let mut second = Harness::start_with(
        file_config(&dir),
        Arc::clone(&lookup),
        Arc::clone(&store),
        Some(Arc::clone(&log)),
    )
    .await;
    second.produce("other", change(Operation::Delete, "other")).await;
    assert!(second.wait_processed(1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    second.replicator.shutdown().await;

    assert_eq!(store.saves().await.len(), 1);
    assert_eq!(store.deletes().await, vec!["other"]);
}

#[tokio::test]
async fn offsets_are_flushed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::start_with(
        file_config(&dir),
        Arc::new(RecordingLookup::new()),
        Arc::new(RecordingStore::new()),
        None,
    )
    .await;

    h.produce("abc123", change(Operation::Delete, "abc123")).await;
    assert!(h.wait_processed(1).await);

    let stream = stream_key(MAIN, h.log.records(MAIN)[0].partition);
    h.replicator.shutdown().await;

    let reopened = OffsetStore::open(&file_config(&dir).offsets, "test-group")
        .await
        .unwrap();
    assert_eq!(reopened.get(&stream).await.as_deref(), Some("0-1"));
    reopened.close().await;
}

/// Topic log whose publishes can be switched off, to simulate a broker outage.
struct FlakyLog {
    inner: Arc<MemoryLog>,
    publish_down: AtomicBool,
}

impl TopicLog for FlakyLog {
    fn partitions(&self) -> u32 {
        self.inner.partitions()
    }

    fn publish(&self, topic: &str, record: OutboundRecord) -> BoxFuture<'_, String> {
        if self.publish_down.load(Ordering::SeqCst) {
            let topic = topic.to_string();
            return Box::pin(async move {
                Err(ReplicatorError::Publish {
                    topic,
                    message: "broker unavailable".to_string(),
                })
            });
        }
        self.inner.publish(topic, record)
    }

    fn read(
        &self,
        topic: &str,
        partition: u32,
        after: &str,
        max: usize,
        block: Duration,
    ) -> BoxFuture<'_, Vec<LogRecord>> {
        self.inner.read(topic, partition, after, max, block)
    }
}

#[tokio::test]
async fn offsets_failed_republish_leaves_record_uncommitted() {
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryLog::new(2));
    memory
        .publish(MAIN, main_record("abc123", change(Operation::Create, "abc123")))
        .await
        .unwrap();
    let stream = stream_key(MAIN, memory.records(MAIN)[0].partition);

    let flaky = Arc::new(FlakyLog {
        inner: Arc::clone(&memory),
        publish_down: AtomicBool::new(true),
    });
    let lookup = Arc::new(RecordingLookup::new());
    lookup.fail_always();
    let store = Arc::new(RecordingStore::new());

    let mut replicator = Replicator::new(
        file_config(&dir),
        Arc::clone(&lookup),
        Arc::clone(&store),
        Arc::clone(&flaky),
    );
    replicator.start().await.unwrap();

    let lookup_ref = &lookup;
    assert!(wait_until(WAIT, || async move { lookup_ref.call_count().await >= 1 }).await);
    // Let the worker spin on the failing republish before stopping it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    replicator.shutdown().await;

    assert_eq!(memory.len(&topic("retry-0")), 0);
    let offsets = OffsetStore::open(&file_config(&dir).offsets, "test-group")
        .await
        .unwrap();
    assert!(offsets.get(&stream).await.is_none());
    offsets.close().await;

    // Broker is back: the same record is read again and applied.
    flaky.publish_down.store(false, Ordering::SeqCst);
    lookup.fail_times(0);
    lookup.insert(movies("abc123")).await;

    let mut replicator = Replicator::new(
        file_config(&dir),
        Arc::clone(&lookup),
        Arc::clone(&store),
        Arc::clone(&flaky),
    );
    replicator.start().await.unwrap();

    let store_ref = &store;
    assert!(wait_until(WAIT, || async move { store_ref.get("abc123").await.is_some() }).await);
    assert_eq!(store.saves().await.len(), 1);

    replicator.shutdown().await;
}
