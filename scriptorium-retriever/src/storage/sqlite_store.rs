//! SQLite implementation of the storage traits
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE snapshots (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     snapshot_type TEXT NOT NULL,
//!     snapshot_date TEXT NOT NULL,     -- ISO date, one row per (type, date)
//!     payload TEXT NOT NULL,           -- versioned envelope, see storage::envelope
//!     metadata TEXT NOT NULL,
//!     created_at TEXT NOT NULL,
//!     UNIQUE(snapshot_type, snapshot_date)
//! );
//!
//! CREATE TABLE file_state (
//!     path TEXT PRIMARY KEY,           -- root-relative, '/'-separated
//!     hash TEXT NOT NULL,              -- blake3 hex
//!     size INTEGER NOT NULL,
//!     mtime REAL NOT NULL,
//!     indexed_at TEXT,
//!     last_seen TEXT NOT NULL
//! );
//!
//! CREATE TABLE change_log (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     recorded_at TEXT NOT NULL,
//!     added TEXT NOT NULL,             -- JSON arrays of paths
//!     modified TEXT NOT NULL,
//!     deleted TEXT NOT NULL
//! );
//! ```
//!
//! Writes are serialized through an async mutex shared by every clone of the
//! store; reads go straight to the pool.

use super::envelope::{self, decode_metadata, decode_payload};
use super::{
    CHANGE_LOG_LIMIT, ChangeLogEntry, ChangeLogStore, FileStateStore, Metadata, Payload,
    PerFileState, Snapshot, SnapshotStore,
};
use crate::retrieval::change_detector::ChangeSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed store for snapshots, file state and the change log.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Opens the store at `db_path`, creating the file and its parent directory if needed.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;
        Self::new_with_pool(pool).await
    }

    /// Opens an in-memory store for testing.
    ///
    /// The pool is pinned to a single connection that never expires, since
    /// every new in-memory connection would see an empty database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The underlying pool, shared with the local vector index.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_type TEXT NOT NULL,
                snapshot_date TEXT NOT NULL,
                payload TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(snapshot_type, snapshot_date)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_state (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime REAL NOT NULL,
                indexed_at TEXT,
                last_seen TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS change_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                added TEXT NOT NULL,
                modified TEXT NOT NULL,
                deleted TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_type_date ON snapshots(snapshot_type, snapshot_date)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Decode a snapshot row, rewriting legacy payloads in place.
    async fn row_to_snapshot(&self, row: &SqliteRow) -> Result<Snapshot> {
        let id: i64 = row.try_get("id")?;
        let raw_payload: String = row.try_get("payload")?;
        let raw_metadata: String = row.try_get("metadata")?;

        let decoded = decode_payload(&raw_payload);
        if decoded.is_legacy() {
            self.rewrite_payload(id, &raw_payload, &decoded.payload).await;
        }

        Ok(Snapshot {
            snapshot_type: row.try_get("snapshot_type")?,
            date: row.try_get("snapshot_date")?,
            payload: decoded.payload,
            metadata: decode_metadata(&raw_metadata),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn rewrite_payload(&self, id: i64, old_raw: &str, payload: &Payload) {
        let result = async {
            let encoded = envelope::encode_payload(payload)?;
            let _guard = self.write_lock.lock().await;
            // Only replace the exact legacy text so a concurrent upsert wins.
            sqlx::query("UPDATE snapshots SET payload = ? WHERE id = ? AND payload = ?")
                .bind(encoded)
                .bind(id)
                .bind(old_raw)
                .execute(&self.pool)
                .await?;
            anyhow::Ok(())
        }
        .await;

        match result {
            Ok(()) => tracing::debug!("Rewrote legacy snapshot payload {}", id),
            Err(err) => tracing::warn!("Failed to rewrite legacy snapshot {}: {}", id, err),
        }
    }

    fn row_to_file_state(row: &SqliteRow) -> Result<PerFileState> {
        let size: i64 = row.try_get("size")?;
        Ok(PerFileState {
            path: row.try_get("path")?,
            hash: row.try_get("hash")?,
            size: size.max(0) as u64,
            mtime: row.try_get("mtime")?,
            indexed_at: row.try_get("indexed_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }

    fn decode_paths(raw: &str) -> BTreeSet<String> {
        serde_json::from_str(raw).unwrap_or_else(|err| {
            tracing::warn!("Undecodable change log path list: {}", err);
            BTreeSet::new()
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn upsert_snapshot(
        &self,
        snapshot_type: &str,
        payload: &Payload,
        date: Option<NaiveDate>,
        metadata: &Metadata,
    ) -> Result<NaiveDate> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let payload = envelope::encode_payload(payload)?;
        let metadata = envelope::encode_metadata(metadata)?;

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO snapshots (snapshot_type, snapshot_date, payload, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(snapshot_type, snapshot_date) DO UPDATE SET
                payload = excluded.payload,
                metadata = excluded.metadata,
                created_at = excluded.created_at
            "#,
        )
        .bind(snapshot_type)
        .bind(date)
        .bind(payload)
        .bind(metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Stored {} snapshot for {}", snapshot_type, date);
        Ok(date)
    }

    async fn latest_snapshot(&self, snapshot_type: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT id, snapshot_type, snapshot_date, payload, metadata, created_at
            FROM snapshots
            WHERE snapshot_type = ?
            ORDER BY snapshot_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(snapshot_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_snapshot(&row).await?)),
            None => Ok(None),
        }
    }

    async fn recent_snapshots(&self, snapshot_type: &str, limit: usize) -> Result<Vec<Snapshot>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, snapshot_type, snapshot_date, payload, metadata, created_at
            FROM snapshots
            WHERE snapshot_type = ?
            ORDER BY snapshot_date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(snapshot_type)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(self.row_to_snapshot(row).await?);
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl FileStateStore for SqliteStore {
    async fn get_file_state(&self, path: &str) -> Result<Option<PerFileState>> {
        let row = sqlx::query(
            "SELECT path, hash, size, mtime, indexed_at, last_seen FROM file_state WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_file_state).transpose()
    }

    async fn upsert_file_state(&self, state: &PerFileState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO file_state (path, hash, size, mtime, indexed_at, last_seen)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                size = excluded.size,
                mtime = excluded.mtime,
                indexed_at = COALESCE(excluded.indexed_at, file_state.indexed_at),
                last_seen = excluded.last_seen
            "#,
        )
        .bind(&state.path)
        .bind(&state.hash)
        .bind(state.size as i64)
        .bind(state.mtime)
        .bind(state.indexed_at)
        .bind(state.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_file_states(&self) -> Result<Vec<PerFileState>> {
        let rows = sqlx::query(
            "SELECT path, hash, size, mtime, indexed_at, last_seen FROM file_state ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_file_state).collect()
    }

    async fn remove_file_state(&self, path: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM file_state WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_indexed(&self, path: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE file_state SET indexed_at = ? WHERE path = ?")
            .bind(at)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeLogStore for SqliteStore {
    async fn record_changes(&self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let added = serde_json::to_string(&changes.added)?;
        let modified = serde_json::to_string(&changes.modified)?;
        let deleted = serde_json::to_string(&changes.deleted)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO change_log (recorded_at, added, modified, deleted) VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(added)
        .bind(modified)
        .bind(deleted)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM change_log WHERE id NOT IN (SELECT id FROM change_log ORDER BY id DESC LIMIT ?)",
        )
        .bind(CHANGE_LOG_LIMIT as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_changes(&self, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT recorded_at, added, modified, deleted FROM change_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let added: String = row.try_get("added")?;
                let modified: String = row.try_get("modified")?;
                let deleted: String = row.try_get("deleted")?;
                Ok(ChangeLogEntry {
                    recorded_at: row.try_get("recorded_at")?,
                    changes: ChangeSet {
                        added: Self::decode_paths(&added),
                        modified: Self::decode_paths(&modified),
                        deleted: Self::decode_paths(&deleted),
                    },
                })
            })
            .collect()
    }
}
