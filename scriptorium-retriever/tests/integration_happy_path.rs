//! End-to-end tests over the real SQLite store and local vector index.
//!
//! These tests verify that:
//! - a first pass chunks and indexes every file
//! - an edit is detected as a modification and only that file is re-embedded
//! - retrieval is fresh after an edit, before re-indexing
//! - embedding failures degrade to the zero vector and are logged

use anyhow::Result;
use async_trait::async_trait;
use scriptorium_embed::{EmbedError, EmbeddingProvider, EmbeddingResult, RetryPolicy};
use scriptorium_retriever::retrieval::{
    change_detector::ChangeDetector,
    chunking_strategy::{ChunkingConfig, FileMatcher},
    indexing_engine::{IndexingEngine, IndexingEngineConfig},
    search::{CorpusSearch, RetrievalEngine, RetrievalEngineConfig},
};
use scriptorium_retriever::storage::{SnapshotStore, sqlite_store::SqliteStore};
use scriptorium_retriever::vector::{
    VectorIndex,
    service::{SqliteConnector, VectorService},
    sqlite_index::SqliteVectorIndex,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tracing_test::traced_test;

const DIMS: usize = 16;

/// Records every text it embeds.
#[derive(Default)]
struct RecordingEmbedder {
    texts: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingEmbedder {
    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    async fn embed_text(&self, text: &str) -> scriptorium_embed::Result<Vec<f32>> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbedError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        let mut v = vec![0.0f32; DIMS];
        for (i, b) in text.bytes().enumerate() {
            v[(b as usize + i) % DIMS] += 1.0;
        }
        Ok(v)
    }

    async fn embed_texts(&self, texts: &[String]) -> scriptorium_embed::Result<EmbeddingResult> {
        let mut out = Vec::new();
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(out))
    }

    fn embedding_dimension(&self) -> usize {
        DIMS
    }

    fn provider_name(&self) -> &str {
        "recording"
    }
}

struct Setup {
    corpus: TempDir,
    _data: TempDir,
    store: SqliteStore,
    embedder: Arc<RecordingEmbedder>,
    indexer: IndexingEngine,
    retriever: RetrievalEngine,
}

async fn setup() -> Result<Setup> {
    let corpus = tempdir()?;
    let data = tempdir()?;
    let store = SqliteStore::open(&data.path().join("scriptorium.db")).await?;
    let vectors = Arc::new(VectorService::new(Arc::new(SqliteConnector::new(
        store.pool().clone(),
    ))));
    let embedder = Arc::new(RecordingEmbedder::default());
    let chunking = ChunkingConfig::new(900, 120);
    let retry = RetryPolicy::fixed(3, Duration::from_millis(1));

    let indexer = IndexingEngine::new(
        IndexingEngineConfig::default()
            .with_chunking(chunking)
            .with_retry(retry),
        ChangeDetector::new(corpus.path(), FileMatcher::default()),
        embedder.clone(),
        vectors.clone(),
        store.clone(),
    );
    let retriever = RetrievalEngine::new(
        RetrievalEngineConfig {
            chunking,
            retry,
            ..RetrievalEngineConfig::default()
        },
        ChangeDetector::new(corpus.path(), FileMatcher::default()),
        embedder.clone(),
        vectors,
        store.clone(),
    );
    Ok(Setup {
        corpus,
        _data: data,
        store,
        embedder,
        indexer,
        retriever,
    })
}

fn prose(len: usize, seed: &str) -> String {
    format!("{seed} sailed the grey sea at dawn. ")
        .repeat(len / 20 + 1)
        .chars()
        .take(len)
        .collect()
}

/// 2000 characters at size 900 / overlap 120 give three chunks; a small edit
/// is a modification and only that file is embedded again.
#[tokio::test]
async fn test_incremental_indexing() -> Result<()> {
    let s = setup().await?;
    let big = s.corpus.path().join("voyage.txt");
    std::fs::write(&big, prose(2000, "Ahab"))?;
    std::fs::write(s.corpus.path().join("log.md"), prose(300, "Starbuck"))?;

    let first = s.indexer.run_pass().await?;
    assert_eq!(first.changes.added.len(), 2);
    let voyage = first.indexed.iter().find(|o| o.path == "voyage.txt").unwrap();
    assert_eq!(voyage.chunks, 3);
    assert_eq!(voyage.upserted, 3);

    let local = SqliteVectorIndex::new(s.store.pool().clone()).await?;
    assert_eq!(local.len().await?, 4);
    let fetched = local
        .fetch(&["voyage.txt:0".to_string(), "voyage.txt:2".to_string()])
        .await?;
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched["voyage.txt:2"].metadata["index"], 2);

    // a 10-character edit
    let mut edited = std::fs::read_to_string(&big)?;
    edited.replace_range(0..10, "Ishmael!!!");
    std::fs::write(&big, edited)?;

    let embedded_before = s.embedder.texts().len();
    let second = s.indexer.run_pass().await?;
    assert!(second.changes.added.is_empty());
    assert!(second.changes.deleted.is_empty());
    assert_eq!(
        second.changes.modified.iter().collect::<Vec<_>>(),
        vec!["voyage.txt"]
    );
    assert_eq!(second.indexed.len(), 1);

    let new_calls = &s.embedder.texts()[embedded_before..];
    assert_eq!(new_calls.len(), 3);
    assert!(new_calls.iter().all(|t| !t.contains("Starbuck")));

    // third pass: nothing to do
    let embedded_before = s.embedder.texts().len();
    assert!(s.indexer.run_pass().await?.is_noop());
    assert_eq!(s.embedder.texts().len(), embedded_before);

    let snapshots = s.store.recent_snapshots("literary_vector", 10).await?;
    assert_eq!(snapshots.len(), 1, "same-day passes overwrite one snapshot");
    assert_eq!(snapshots[0].payload.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_retrieval_is_fresh_before_reindexing() -> Result<()> {
    let s = setup().await?;
    let path = s.corpus.path().join("chapter.txt");
    std::fs::write(&path, "The whiteness of the whale.")?;
    s.indexer.run_pass().await?;

    let found = s.retriever.search_in_file("chapter.txt", "whale", 3).await?;
    assert_eq!(found, vec!["The whiteness of the whale.".to_string()]);
    assert!(s.retriever.search_corpus("whale").await?.is_found());

    std::fs::write(&path, "Loomings.")?;
    assert!(s.retriever.search_in_file("chapter.txt", "whale", 3).await?.is_empty());
    assert_eq!(s.retriever.search_corpus("whale").await?, CorpusSearch::NothingFound);

    s.indexer.run_pass().await?;
    let found = s.retriever.search_in_file("chapter.txt", "whale", 3).await?;
    assert_eq!(found, vec!["Loomings.".to_string()]);
    Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_embedding_outage_degrades() -> Result<()> {
    let s = setup().await?;
    s.embedder.failing.store(true, Ordering::SeqCst);
    std::fs::write(s.corpus.path().join("a.txt"), "Queequeg")?;

    let report = s.indexer.run_pass().await?;
    assert_eq!(report.degraded(), 1);
    assert_eq!(s.embedder.texts().len(), 3);
    assert!(logs_contain("storing zero vector"));

    let local = SqliteVectorIndex::new(s.store.pool().clone()).await?;
    let record = &local.fetch(&["a.txt:0".to_string()]).await?["a.txt:0"];
    assert!(record.embedding.iter().all(|v| *v == 0.0));
    assert_eq!(record.embedding.len(), DIMS);

    let snapshot = s.store.latest_snapshot("literary_vector").await?.unwrap();
    assert_eq!(snapshot.metadata["degraded"], 1);

    // with the provider still down, corpus search reports unavailability
    assert!(matches!(
        s.retriever.search_corpus("harpoon").await?,
        CorpusSearch::Unavailable(_)
    ));
    Ok(())
}
