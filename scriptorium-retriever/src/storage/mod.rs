//! Durable indexing state for scriptorium-retriever
//!
//! Three kinds of records live here, each behind its own trait so callers
//! depend on the operation rather than on SQLite:
//!
//! - **SnapshotStore**: dated, typed `path → hash` snapshots of what was indexed
//! - **FileStateStore**: per-file hash/size/mtime as last seen by the directory monitor
//! - **ChangeLogStore**: a short history of non-empty change sets
//!
//! ## Architecture
//!
//! ```text
//! SnapshotStore ──┐
//! FileStateStore ─┼── SqliteStore (concrete implementation)
//! ChangeLogStore ─┘
//! ```
//!
//! Snapshot payloads are wrapped in a versioned envelope, see [`envelope`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::retrieval::change_detector::ChangeSet;

pub mod envelope;
pub mod sqlite_store;

/// Free-form JSON metadata attached to snapshots and vector records.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Snapshot payload: root-relative path to content hash.
pub type Payload = BTreeMap<String, String>;

/// Change-log entries kept by [`ChangeLogStore::record_changes`].
pub const CHANGE_LOG_LIMIT: usize = 50;

/// A dated record of indexing state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub snapshot_type: String,
    pub date: NaiveDate,
    pub payload: Payload,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Last observed state of one corpus file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerFileState {
    pub path: String,
    pub hash: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub mtime: f64,
    pub indexed_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

impl PerFileState {
    /// Whether `other` describes the same content and attributes.
    pub fn same_as(&self, hash: &str, size: u64, mtime: f64) -> bool {
        self.hash == hash && self.size == size && self.mtime == mtime
    }
}

/// One recorded change set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogEntry {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub changes: ChangeSet,
}

/// Dated, typed snapshots. Unique per `(type, date)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or overwrite the snapshot for `(snapshot_type, date)`; `None` means today (UTC).
    async fn upsert_snapshot(
        &self,
        snapshot_type: &str,
        payload: &Payload,
        date: Option<NaiveDate>,
        metadata: &Metadata,
    ) -> Result<NaiveDate>;

    /// Most recent snapshot by date, then insertion order.
    async fn latest_snapshot(&self, snapshot_type: &str) -> Result<Option<Snapshot>>;

    /// Up to `limit` snapshots, most recent first.
    async fn recent_snapshots(&self, snapshot_type: &str, limit: usize) -> Result<Vec<Snapshot>>;
}

/// Per-file state used by the directory monitor.
#[async_trait]
pub trait FileStateStore: Send + Sync {
    async fn get_file_state(&self, path: &str) -> Result<Option<PerFileState>>;

    async fn upsert_file_state(&self, state: &PerFileState) -> Result<()>;

    async fn list_file_states(&self) -> Result<Vec<PerFileState>>;

    /// Returns whether a row was removed
    async fn remove_file_state(&self, path: &str) -> Result<bool>;

    async fn mark_indexed(&self, path: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Bounded history of detected changes.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Append a change set; empty sets are ignored. Only the newest
    /// [`CHANGE_LOG_LIMIT`] entries are retained.
    async fn record_changes(&self, changes: &ChangeSet) -> Result<()>;

    async fn recent_changes(&self, limit: usize) -> Result<Vec<ChangeLogEntry>>;
}
