// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Committed read positions, persisted in SQLite.
//!
//! Acknowledging a message means committing its offset for the
//! `topic:partition` stream it was read from. On restart each worker resumes
//! after its committed offset, so anything read but not yet acknowledged is
//! read again.
//!
//! # Debounced Writes
//!
//! - `commit()` updates the in-memory cache immediately and marks the stream
//!   dirty
//! - `flush_dirty()` persists every dirty offset in one pass
//! - The engine flushes periodically, right after every escalation, and on
//!   shutdown
//! - Flushes are serialized, so a slower flush never overwrites a newer one
//!
//! A crash between `commit()` and `flush_dirty()` replays at most one flush
//! interval of messages. Saves and deletes are idempotent so a replay only
//! costs work, except that a replayed failure may hop twice.
//!
//! # SQLite Busy Handling
//!
//! SQLITE_BUSY/SQLITE_LOCKED are retried with exponential backoff; the cache
//! is always updated first.

use crate::config::OffsetConfig;
use crate::error::{ReplicatorError, Result};
use crate::transport::{compare_offsets, START_OFFSET};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::offset_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Offset store for one consumer group.
pub struct OffsetStore {
    pool: SqlitePool,
    group: String,
    cache: RwLock<HashMap<String, String>>,
    dirty: RwLock<HashSet<String>>,
    /// Held for a whole flush: drain, snapshot and upsert.
    flush_lock: Mutex<()>,
    wal: bool,
}

impl OffsetStore {
    /// Open the store described by `config` for `group`.
    ///
    /// Creates the database and table if they don't exist and loads the
    /// group's committed offsets.
    pub async fn open(config: &OffsetConfig, group: &str) -> Result<Self> {
        let (pool, wal) = match &config.sqlite_path {
            Some(path) => {
                info!(path = %path, group = %group, "Opening offset store");
                let journal = if config.wal_mode {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                };
                let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path))
                    .map_err(|e| ReplicatorError::Config(format!("Invalid SQLite path: {}", e)))?
                    .journal_mode(journal)
                    .synchronous(SqliteSynchronous::Normal)
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(2)
                    .connect_with(options)
                    .await?;
                (pool, config.wal_mode)
            }
            None => {
                debug!(group = %group, "Opening in-memory offset store");
                let options = SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(|e| ReplicatorError::Config(format!("Invalid SQLite path: {}", e)))?;

                // Each connection to :memory: is its own database, so pin one.
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?;
                (pool, false)
            }
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consumer_offsets (
                group_id TEXT NOT NULL,
                stream_key TEXT NOT NULL,
                stream_offset TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (group_id, stream_key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT stream_key, stream_offset FROM consumer_offsets WHERE group_id = ?")
                .bind(group)
                .fetch_all(&pool)
                .await?;

        let cache: HashMap<String, String> = rows.into_iter().collect();
        if !cache.is_empty() {
            info!(count = cache.len(), group = %group, "Restored offsets from previous run");
        }

        Ok(Self {
            pool,
            group: group.to_string(),
            cache: RwLock::new(cache),
            dirty: RwLock::new(HashSet::new()),
            flush_lock: Mutex::new(()),
            wal,
        })
    }

    /// Committed offset for a stream, `None` if nothing was committed yet.
    pub async fn get(&self, stream_key: &str) -> Option<String> {
        self.cache.read().await.get(stream_key).cloned()
    }

    /// Committed offset, or the start of the stream.
    pub async fn get_or_start(&self, stream_key: &str) -> String {
        self.get(stream_key)
            .await
            .unwrap_or_else(|| START_OFFSET.to_string())
    }

    /// Commit an offset (debounced). Offsets never move backwards.
    pub async fn commit(&self, stream_key: &str, offset: &str) {
        {
            let mut cache = self.cache.write().await;
            if let Some(current) = cache.get(stream_key) {
                if compare_offsets(offset, current).is_le() {
                    return;
                }
            }
            cache.insert(stream_key.to_string(), offset.to_string());
        }

        self.dirty.write().await.insert(stream_key.to_string());
        debug!(stream = %stream_key, offset = %offset, "Offset committed (pending flush)");
    }

    /// Persist every dirty offset. Returns the number written.
    pub async fn flush_dirty(&self) -> Result<usize> {
        let _flushing = self.flush_lock.lock().await;
        let dirty_keys: Vec<String> = self.dirty.write().await.drain().collect();
        if dirty_keys.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let snapshot: Vec<(String, String)> = {
            let cache = self.cache.read().await;
            dirty_keys
                .iter()
                .filter_map(|k| cache.get(k).map(|o| (k.clone(), o.clone())))
                .collect()
        };

        let mut flushed = 0;
        let mut errors = 0;

        for (stream_key, offset) in snapshot {
            let result = execute_with_retry("offset_flush", || async {
                sqlx::query(
                    r#"
                    INSERT INTO consumer_offsets (group_id, stream_key, stream_offset, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(group_id, stream_key) DO UPDATE SET
                        stream_offset = excluded.stream_offset,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&self.group)
                .bind(&stream_key)
                .bind(&offset)
                .bind(now)
                .execute(&self.pool)
                .await
            })
            .await;

            match result {
                Ok(_) => flushed += 1,
                Err(e) => {
                    errors += 1;
                    warn!(stream = %stream_key, error = %e, "Failed to flush offset");
                    self.dirty.write().await.insert(stream_key);
                }
            }
        }

        crate::metrics::record_offset_flush(flushed, errors);
        if flushed > 0 {
            debug!(flushed, errors, "Flushed dirty offsets");
        }

        if errors > 0 {
            return Err(ReplicatorError::Internal(format!(
                "Failed to flush {} offsets",
                errors
            )));
        }

        Ok(flushed)
    }

    /// Whether any committed offset is not yet on disk.
    pub async fn has_dirty(&self) -> bool {
        !self.dirty.read().await.is_empty()
    }

    /// Number of offsets pending flush.
    pub async fn dirty_count(&self) -> usize {
        self.dirty.read().await.len()
    }

    /// Every committed offset of this group.
    #[cfg(test)]
    pub async fn get_all(&self) -> HashMap<String, String> {
        self.cache.read().await.clone()
    }

    /// Force the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<()> {
        if !self.wal {
            return Ok(());
        }

        execute_with_retry("offset_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Flush, checkpoint and close the pool.
    pub async fn close(&self) {
        if self.has_dirty().await {
            match self.flush_dirty().await {
                Ok(count) => info!(count, "Flushed dirty offsets on close"),
                Err(e) => warn!(error = %e, "Failed to flush dirty offsets on close"),
            }
        }

        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Offset store closed");
    }
}
