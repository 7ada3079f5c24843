//! Incremental indexing pipeline.
//!
//! One pass compares the corpus against the latest snapshot and pushes every
//! added or modified document through
//!
//! ```text
//! read → hash → chunk → embed (retry, else zero vector) → upsert (retry, else skip)
//! ```
//!
//! then records a fresh snapshot of what is indexed. Records are keyed
//! `path:index` and carry the content hash they were built from, so re-indexing
//! a file overwrites its records in place and stale ones are masked at query
//! time by the hash filter.
//!
//! ## Failure handling
//!
//! - An embedding that keeps failing is replaced by the all-zero vector of the
//!   provider's dimension and counted as degraded.
//! - An upsert that keeps failing is logged and skipped; the other chunks still go in.
//! - A file that cannot be read, or whose turn comes while the vector index is
//!   not ready, fails as a whole. It keeps its previous snapshot hash (or is left
//!   out entirely) so the next pass picks it up again.
//! - Deleted files are dropped from the snapshot payload and listed in its
//!   `deleted` metadata. Their vectors stay in the index.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use scriptorium_embed::{EmbeddingProvider, RetryPolicy, retry_async};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::change_detector::{ChangeDetector, ChangeSet, diff, hash_bytes};
use super::chunking_strategy::{ChunkingConfig, ChunkingStrategy};
use crate::config::Config;
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::{ChangeLogStore, FileStateStore, Metadata, Payload, SnapshotStore};
use crate::vector::VectorRecord;
use crate::vector::service::VectorService;

/// Configuration for the indexing engine
#[derive(Debug, Clone)]
pub struct IndexingEngineConfig {
    pub chunking: ChunkingConfig,
    /// Applied to every embedding request and every upsert
    pub retry: RetryPolicy,
    /// Files indexed concurrently within one pass
    pub concurrency: usize,
    pub snapshot_type: String,
}

impl Default for IndexingEngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retry: RetryPolicy::default(),
            concurrency: 4,
            snapshot_type: "literary_vector".to_string(),
        }
    }
}

impl IndexingEngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking,
            retry: config.embedding.retry,
            concurrency: config.pipeline.concurrency,
            snapshot_type: config.pipeline.snapshot_type.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub passes: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub upserts: usize,
    pub degraded_embeddings: usize,
    pub failed_upserts: usize,
    pub errors: usize,
}

/// What happened to one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: String,
    /// Hash of the content that was actually indexed
    pub hash: String,
    pub chunks: usize,
    pub upserted: usize,
    pub degraded: usize,
    pub failed_upserts: usize,
}

/// Result of one [`IndexingEngine::run_pass`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub changes: ChangeSet,
    pub indexed: Vec<FileOutcome>,
    /// `(path, reason)` for files that failed as a whole
    pub failed: Vec<(String, String)>,
    /// `None` when nothing changed and no snapshot was written
    pub snapshot_date: Option<chrono::NaiveDate>,
}

impl PassReport {
    pub fn is_noop(&self) -> bool {
        self.snapshot_date.is_none()
    }

    pub fn degraded(&self) -> usize {
        self.indexed.iter().map(|o| o.degraded).sum()
    }

    pub fn chunks(&self) -> usize {
        self.indexed.iter().map(|o| o.chunks).sum()
    }
}

/// Drives change detection, chunking, embedding and vector upserts.
pub struct IndexingEngine {
    config: IndexingEngineConfig,
    detector: ChangeDetector,
    chunker: ChunkingStrategy,
    provider: Arc<dyn EmbeddingProvider>,
    vectors: Arc<VectorService>,
    store: SqliteStore,
    stats: RwLock<ProcessingStats>,
}

impl IndexingEngine {
    pub fn new(
        config: IndexingEngineConfig,
        detector: ChangeDetector,
        provider: Arc<dyn EmbeddingProvider>,
        vectors: Arc<VectorService>,
        store: SqliteStore,
    ) -> Self {
        Self {
            chunker: ChunkingStrategy::new(config.chunking),
            config,
            detector,
            provider,
            vectors,
            store,
            stats: RwLock::new(ProcessingStats::default()),
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn config(&self) -> &IndexingEngineConfig {
        &self.config
    }

    pub async fn stats(&self) -> ProcessingStats {
        self.stats.read().await.clone()
    }

    /// Embed `text`, falling back to the zero vector once retries run out.
    ///
    /// Returns the vector and whether it is the fallback. Whitespace-only text
    /// gets the zero vector without a provider call.
    pub async fn embed_or_sentinel(&self, text: &str, label: &str) -> (Vec<f32>, bool) {
        let sentinel = || vec![0.0f32; self.provider.embedding_dimension()];
        if text.trim().is_empty() {
            return (sentinel(), false);
        }

        match retry_async(&self.config.retry, label, || self.provider.embed_text(text)).await {
            Ok(embedding) => (embedding, false),
            Err(exhausted) => {
                warn!(
                    "Embedding {} failed after {} attempts, storing zero vector: {}",
                    label, exhausted.attempts, exhausted.last
                );
                (sentinel(), true)
            }
        }
    }

    /// Index one document by root-relative path.
    pub async fn index_file(&self, key: &str) -> Result<FileOutcome> {
        let path = self.detector.resolve(key);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let hash = hash_bytes(&bytes);
        let text = String::from_utf8_lossy(&bytes);

        let index = self.vectors.index().await?;
        let chunks = self.chunker.chunk_content(Path::new(key), &text);

        let mut outcome = FileOutcome {
            path: key.to_string(),
            hash: hash.clone(),
            chunks: chunks.len(),
            upserted: 0,
            degraded: 0,
            failed_upserts: 0,
        };

        for (i, chunk) in chunks.iter().enumerate() {
            let label = format!("{key}:{i}");
            let (embedding, degraded) = self.embed_or_sentinel(chunk, &label).await;
            if degraded {
                outcome.degraded += 1;
            }

            let record = VectorRecord::for_chunk(key, i, &hash, embedding);
            let upsert = retry_async(&self.config.retry, &label, || index.upsert(record.clone())).await;
            match upsert {
                Ok(()) => outcome.upserted += 1,
                Err(exhausted) => {
                    warn!(
                        "Upsert of {} failed after {} attempts, skipping: {}",
                        label, exhausted.attempts, exhausted.last
                    );
                    outcome.failed_upserts += 1;
                }
            }
        }

        debug!(
            "Indexed {}: {} chunks, {} degraded, {} failed upserts",
            key, outcome.chunks, outcome.degraded, outcome.failed_upserts
        );
        Ok(outcome)
    }

    /// Detect changes against the latest snapshot and index them.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let snapshot_type = &self.config.snapshot_type;
        let baseline = self.store.latest_snapshot(snapshot_type).await?;
        let previous = baseline
            .as_ref()
            .map(|s| s.payload.clone())
            .unwrap_or_default();

        let current = self.detector.scan_async().await?;
        let changes = diff(&previous, &current);

        if changes.is_empty() && baseline.is_some() {
            debug!("No changes since last {} snapshot", snapshot_type);
            self.stats.write().await.passes += 1;
            return Ok(PassReport {
                changes,
                ..PassReport::default()
            });
        }

        info!(
            "Indexing pass: {} added, {} modified, {} deleted",
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
        self.store.record_changes(&changes).await?;

        let to_index: Vec<String> = changes.to_index().into_iter().collect();
        let results: Vec<(String, Result<FileOutcome>)> = stream::iter(to_index)
            .map(|key| async move {
                let result = self.index_file(&key).await;
                (key, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut payload: Payload = current;
        let mut report = PassReport {
            changes,
            ..PassReport::default()
        };
        let now = Utc::now();

        for (key, result) in results {
            match result {
                Ok(outcome) => {
                    payload.insert(key.clone(), outcome.hash.clone());
                    self.store.mark_indexed(&key, now).await?;
                    report.indexed.push(outcome);
                }
                Err(err) => {
                    warn!("Failed to index {}: {:#}", key, err);
                    match previous.get(&key) {
                        Some(old_hash) => {
                            payload.insert(key.clone(), old_hash.clone());
                        }
                        None => {
                            payload.remove(&key);
                        }
                    }
                    report.failed.push((key, format!("{err:#}")));
                }
            }
        }
        report.indexed.sort_by(|a, b| a.path.cmp(&b.path));
        report.failed.sort();

        let metadata = self.snapshot_metadata(&report, &payload, baseline.as_ref().map(|s| &s.metadata));
        let date = self
            .store
            .upsert_snapshot(snapshot_type, &payload, None, &metadata)
            .await?;
        report.snapshot_date = Some(date);

        {
            let mut stats = self.stats.write().await;
            stats.passes += 1;
            stats.files_processed += report.indexed.len();
            stats.files_failed += report.failed.len();
            stats.chunks_created += report.chunks();
            stats.upserts += report.indexed.iter().map(|o| o.upserted).sum::<usize>();
            stats.degraded_embeddings += report.degraded();
            stats.failed_upserts += report.indexed.iter().map(|o| o.failed_upserts).sum::<usize>();
            stats.errors += report.failed.len();
        }

        info!(
            "Indexed {} files ({} chunks, {} degraded, {} failed); snapshot {} has {} files",
            report.indexed.len(),
            report.chunks(),
            report.degraded(),
            report.failed.len(),
            date,
            payload.len()
        );
        Ok(report)
    }

    fn snapshot_metadata(
        &self,
        report: &PassReport,
        payload: &Payload,
        previous: Option<&Metadata>,
    ) -> Metadata {
        let mut tombstones: BTreeSet<String> = previous
            .and_then(|m| m.get("deleted"))
            .and_then(|v| v.as_array())
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        tombstones.extend(report.changes.deleted.iter().cloned());
        tombstones.retain(|path| !payload.contains_key(path));

        let mut metadata = Metadata::new();
        metadata.insert("file_count".to_string(), payload.len().into());
        metadata.insert("files_indexed".to_string(), report.indexed.len().into());
        metadata.insert("chunks_total".to_string(), report.chunks().into());
        metadata.insert("degraded".to_string(), report.degraded().into());
        metadata.insert(
            "failed".to_string(),
            report
                .failed
                .iter()
                .map(|(path, _)| path.clone())
                .collect::<Vec<_>>()
                .into(),
        );
        metadata.insert(
            "deleted".to_string(),
            tombstones.into_iter().collect::<Vec<_>>().into(),
        );
        metadata.insert(
            "embedding_model".to_string(),
            self.provider.provider_name().into(),
        );
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::chunking_strategy::FileMatcher;
    use crate::test_support::{DIMS, FakeEmbedder, MemoryIndex};
    use crate::vector::IndexError;
    use crate::vector::service::IndexConnector;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tracing_test::traced_test;

    struct Harness {
        dir: TempDir,
        embedder: Arc<FakeEmbedder>,
        index: Arc<MemoryIndex>,
        engine: IndexingEngine,
    }

    async fn harness(embedder: Arc<FakeEmbedder>) -> Result<Harness> {
        let dir = tempdir()?;
        let index = MemoryIndex::new();
        let store = SqliteStore::open_memory().await?;
        let config = IndexingEngineConfig::default()
            .with_chunking(ChunkingConfig::new(900, 120))
            .with_retry(RetryPolicy::fixed(3, Duration::ZERO));
        let engine = IndexingEngine::new(
            config,
            ChangeDetector::new(dir.path(), FileMatcher::default()),
            embedder.clone(),
            Arc::new(VectorService::ready(index.clone())),
            store,
        );
        Ok(Harness {
            dir,
            embedder,
            index,
            engine,
        })
    }

    fn text_of_len(n: usize) -> String {
        "the whale ".repeat(n / 10 + 1).chars().take(n).collect()
    }

    #[tokio::test]
    async fn test_first_pass_indexes_everything() -> Result<()> {
        let h = harness(FakeEmbedder::new()).await?;
        std::fs::write(h.dir.path().join("moby.txt"), text_of_len(2000))?;
        std::fs::write(h.dir.path().join("short.md"), "Call me Ishmael.")?;

        let report = h.engine.run_pass().await?;
        assert_eq!(report.changes.added.len(), 2);
        assert_eq!(report.indexed.len(), 2);
        assert_eq!(report.chunks(), 4);
        assert_eq!(h.index.len(), 4);
        assert!(h.index.get("moby.txt:2").is_some());

        let snapshot = h.engine.store().latest_snapshot("literary_vector").await?.unwrap();
        assert_eq!(snapshot.payload.len(), 2);
        assert_eq!(snapshot.metadata["file_count"], 2);
        assert_eq!(snapshot.metadata["chunks_total"], 4);
        assert_eq!(snapshot.metadata["embedding_model"], "fake");
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_pass_is_noop() -> Result<()> {
        let h = harness(FakeEmbedder::new()).await?;
        std::fs::write(h.dir.path().join("a.txt"), "alpha")?;
        h.engine.run_pass().await?;
        let calls = h.embedder.calls();

        let report = h.engine.run_pass().await?;
        assert!(report.is_noop());
        assert!(report.changes.is_empty());
        assert_eq!(h.embedder.calls(), calls);
        assert_eq!(h.engine.stats().await.passes, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_corpus_still_writes_baseline() -> Result<()> {
        let h = harness(FakeEmbedder::new()).await?;
        let report = h.engine.run_pass().await?;
        assert!(!report.is_noop());
        assert!(h.engine.store().latest_snapshot("literary_vector").await?.is_some());

        let report = h.engine.run_pass().await?;
        assert!(report.is_noop());
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_embedding_failure_degrades_to_zero_vector() -> Result<()> {
        let h = harness(FakeEmbedder::failing()).await?;
        std::fs::write(h.dir.path().join("a.txt"), "some text")?;

        let report = h.engine.run_pass().await?;
        assert_eq!(report.degraded(), 1);
        assert_eq!(h.embedder.calls(), 3);

        let record = h.index.get("a.txt:0").unwrap();
        assert_eq!(record.embedding, vec![0.0; DIMS]);
        assert!(logs_contain("storing zero vector"));

        let snapshot = h.engine.store().latest_snapshot("literary_vector").await?.unwrap();
        assert_eq!(snapshot.metadata["degraded"], 1);
        assert_eq!(h.engine.stats().await.degraded_embeddings, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_whitespace_text_skips_provider() -> Result<()> {
        let h = harness(FakeEmbedder::new()).await?;
        let (vector, degraded) = h.engine.embed_or_sentinel("   \n", "blank").await;
        assert_eq!(vector, vec![0.0; DIMS]);
        assert!(!degraded);
        assert_eq!(h.embedder.calls(), 0);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_upserts_are_skipped() -> Result<()> {
        let h = harness(FakeEmbedder::new()).await?;
        h.index.reject_upserts.store(true, Ordering::SeqCst);
        std::fs::write(h.dir.path().join("a.txt"), text_of_len(2000))?;

        let report = h.engine.run_pass().await?;
        assert_eq!(report.indexed.len(), 1);
        assert_eq!(report.indexed[0].failed_upserts, 3);
        // 400 is permanent, so one attempt per chunk
        assert_eq!(h.index.upserts(), 3);
        assert!(logs_contain("skipping"));
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_files_are_tombstoned() -> Result<()> {
        let h = harness(FakeEmbedder::new()).await?;
        std::fs::write(h.dir.path().join("a.txt"), "alpha")?;
        std::fs::write(h.dir.path().join("b.txt"), "beta")?;
        h.engine.run_pass().await?;

        std::fs::remove_file(h.dir.path().join("a.txt"))?;
        let report = h.engine.run_pass().await?;
        assert!(report.changes.deleted.contains("a.txt"));

        let snapshot = h.engine.store().latest_snapshot("literary_vector").await?.unwrap();
        assert!(!snapshot.payload.contains_key("a.txt"));
        assert_eq!(snapshot.metadata["deleted"], serde_json::json!(["a.txt"]));
        // vectors are retained
        assert!(h.index.get("a.txt:0").is_some());

        let changes = h.engine.store().recent_changes(10).await?;
        assert_eq!(changes.len(), 2);
        Ok(())
    }

    struct DownConnector;

    #[async_trait]
    impl IndexConnector for DownConnector {
        async fn connect(&self) -> crate::vector::IndexResult<Arc<dyn crate::vector::VectorIndex>> {
            Err(IndexError::config("no host"))
        }

        fn target(&self) -> String {
            "down".to_string()
        }
    }

    #[tokio::test]
    async fn test_index_not_ready_leaves_file_for_next_pass() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("a.txt"), "alpha")?;
        let engine = IndexingEngine::new(
            IndexingEngineConfig::default().with_retry(RetryPolicy::no_retry()),
            ChangeDetector::new(dir.path(), FileMatcher::default()),
            FakeEmbedder::new(),
            Arc::new(VectorService::new(Arc::new(DownConnector))),
            SqliteStore::open_memory().await?,
        );

        let report = engine.run_pass().await?;
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("not ready"));

        let snapshot = engine.store().latest_snapshot("literary_vector").await?.unwrap();
        assert!(snapshot.payload.is_empty());

        // still pending on the next pass
        let report = engine.run_pass().await?;
        assert_eq!(report.changes.added.len(), 1);
        Ok(())
    }
}
