//! Free-form memory entries stored alongside corpus chunks.
//!
//! An entry is any text worth recalling later (a note, a conversation summary).
//! It is embedded and upserted under its own id with caller metadata plus a
//! `ts` timestamp, and can be fetched back by id.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::indexing_engine::IndexingEngine;
use crate::vector::service::VectorService;
use crate::vector::{Metadata, VectorRecord};

pub struct MemoryJournal {
    indexer: Arc<IndexingEngine>,
    vectors: Arc<VectorService>,
}

impl MemoryJournal {
    /// Embeddings go through `indexer` so entries get the same retry and
    /// zero-vector fallback as corpus chunks.
    pub fn new(indexer: Arc<IndexingEngine>, vectors: Arc<VectorService>) -> Self {
        Self { indexer, vectors }
    }

    /// Store `text` and return its id: `metadata.id` when given, otherwise
    /// `memory-<timestamp>`.
    pub async fn add_entry(&self, text: &str, mut metadata: Metadata) -> Result<String> {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let id = metadata
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("memory-{ts}"));
        metadata.insert("ts".to_string(), ts.into());

        let index = self.vectors.index().await?;
        let (embedding, _) = self.indexer.embed_or_sentinel(text, &id).await;
        index
            .upsert(VectorRecord {
                id: id.clone(),
                embedding,
                metadata,
            })
            .await?;

        info!("Memory entry stored: {}", id);
        Ok(id)
    }

    /// Stored entries by id; unknown ids are absent.
    pub async fn fetch_entries(&self, ids: &[String]) -> Result<HashMap<String, VectorRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.vectors.fetch(ids).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::change_detector::ChangeDetector;
    use crate::retrieval::chunking_strategy::FileMatcher;
    use crate::retrieval::indexing_engine::IndexingEngineConfig;
    use crate::storage::sqlite_store::SqliteStore;
    use crate::test_support::{DIMS, FakeEmbedder, MemoryIndex};
    use crate::vector::IndexError;
    use crate::vector::service::IndexConnector;
    use async_trait::async_trait;
    use scriptorium_embed::RetryPolicy;
    use serde_json::json;

    async fn journal_with(vectors: Arc<VectorService>) -> MemoryJournal {
        let indexer = IndexingEngine::new(
            IndexingEngineConfig::default().with_retry(RetryPolicy::no_retry()),
            ChangeDetector::new("unused", FileMatcher::default()),
            FakeEmbedder::new(),
            vectors.clone(),
            SqliteStore::open_memory().await.unwrap(),
        );
        MemoryJournal::new(Arc::new(indexer), vectors)
    }

    #[tokio::test]
    async fn test_add_entry_with_explicit_id() {
        let index = MemoryIndex::new();
        let journal = journal_with(Arc::new(VectorService::ready(index.clone()))).await;

        let mut metadata = Metadata::new();
        metadata.insert("id".to_string(), json!("note-1"));
        metadata.insert("topic".to_string(), json!("whales"));
        let id = journal.add_entry("Call me Ishmael", metadata).await.unwrap();
        assert_eq!(id, "note-1");

        let record = index.get("note-1").unwrap();
        assert_eq!(record.embedding, FakeEmbedder::vector_for("Call me Ishmael"));
        assert_eq!(record.metadata["topic"], "whales");
        assert!(record.metadata["ts"].as_str().is_some());

        let fetched = journal.fetch_entries(&[id, "missing".to_string()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
    }

    #[tokio::test]
    async fn test_generated_id_and_blank_text() {
        let index = MemoryIndex::new();
        let journal = journal_with(Arc::new(VectorService::ready(index.clone()))).await;

        let id = journal.add_entry("  ", Metadata::new()).await.unwrap();
        assert!(id.starts_with("memory-"));
        assert_eq!(index.get(&id).unwrap().embedding, vec![0.0; DIMS]);
    }

    struct Unreachable;

    #[async_trait]
    impl IndexConnector for Unreachable {
        async fn connect(&self) -> crate::vector::IndexResult<Arc<dyn crate::vector::VectorIndex>> {
            Err(IndexError::config("unreachable"))
        }

        fn target(&self) -> String {
            "unreachable".to_string()
        }
    }

    #[tokio::test]
    async fn test_fetch_with_no_ids_skips_index() {
        let journal = journal_with(Arc::new(VectorService::new(Arc::new(Unreachable)))).await;
        assert!(journal.fetch_entries(&[]).await.unwrap().is_empty());
        assert!(journal.fetch_entries(&["x".to_string()]).await.is_err());
        assert!(journal.add_entry("text", Metadata::new()).await.is_err());
    }
}
