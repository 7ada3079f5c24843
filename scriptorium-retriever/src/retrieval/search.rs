//! Query-time retrieval.
//!
//! Chunk text is never stored in the index. A match only carries
//! `{path, index, hash}`, and the text is recovered by re-chunking the file as
//! it is *now*. Queries filter on the current content hash, so records built
//! from older content never match and the re-chunked text always lines up with
//! the vectors that produced the hit.

use anyhow::Result;
use scriptorium_embed::{EmbeddingProvider, RetryPolicy, Retryable, retry_async};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::change_detector::{ChangeDetector, hash_bytes};
use super::chunking_strategy::{ChunkingConfig, chunk};
use crate::config::Config;
use crate::storage::SnapshotStore;
use crate::storage::sqlite_store::SqliteStore;
use crate::vector::service::VectorService;
use crate::vector::{IndexError, IndexResult, Metadata, VectorMatch};

const FILE_SEPARATOR: &str = "\n\n==========\n\n";
const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone)]
pub struct RetrievalEngineConfig {
    pub chunking: ChunkingConfig,
    pub retry: RetryPolicy,
    pub top_k: usize,
    /// Matches taken per file in a corpus-wide search
    pub corpus_top_k: usize,
    pub snapshot_type: String,
}

impl Default for RetrievalEngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retry: RetryPolicy::default(),
            top_k: 5,
            corpus_top_k: 2,
            snapshot_type: "literary_vector".to_string(),
        }
    }
}

impl RetrievalEngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking,
            retry: config.embedding.retry,
            top_k: config.retrieval.top_k,
            corpus_top_k: config.retrieval.corpus_top_k,
            snapshot_type: config.pipeline.snapshot_type.clone(),
        }
    }
}

/// A recovered chunk with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub index: usize,
    pub score: f32,
    pub text: String,
}

/// Outcome of a corpus-wide search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusSearch {
    /// Formatted excerpts, one block per file
    Found(String),
    /// Files are indexed but none matched
    NothingFound,
    /// No snapshot lists any file yet
    NothingIndexed,
    /// The index or the query embedding could not be reached
    Unavailable(String),
}

impl CorpusSearch {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl std::fmt::Display for CorpusSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found(text) => f.write_str(text),
            Self::NothingFound => f.write_str("No relevant information found in the corpus."),
            Self::NothingIndexed => f.write_str("No corpus files have been indexed yet."),
            Self::Unavailable(reason) => write!(f, "Retrieval unavailable: {reason}"),
        }
    }
}

pub struct RetrievalEngine {
    config: RetrievalEngineConfig,
    detector: ChangeDetector,
    provider: Arc<dyn EmbeddingProvider>,
    vectors: Arc<VectorService>,
    store: SqliteStore,
}

impl RetrievalEngine {
    pub fn new(
        config: RetrievalEngineConfig,
        detector: ChangeDetector,
        provider: Arc<dyn EmbeddingProvider>,
        vectors: Arc<VectorService>,
        store: SqliteStore,
    ) -> Self {
        Self {
            config,
            detector,
            provider,
            vectors,
            store,
        }
    }

    pub fn config(&self) -> &RetrievalEngineConfig {
        &self.config
    }

    /// Embed the query. Exhausted retries surface as [`IndexError::NotReady`]
    /// since nothing can be retrieved without a query vector.
    async fn embed_query(&self, query: &str) -> IndexResult<Vec<f32>> {
        retry_async(&self.config.retry, "query", || self.provider.embed_text(query))
            .await
            .map_err(|exhausted| {
                IndexError::not_ready(format!(
                    "query embedding failed after {} attempts: {}",
                    exhausted.attempts, exhausted.last
                ))
            })
    }

    /// Top chunks of one document for `query`, as text.
    pub async fn search_in_file(&self, path: &str, query: &str, top_k: usize) -> IndexResult<Vec<String>> {
        Ok(self
            .search_in_file_scored(path, query, top_k)
            .await?
            .into_iter()
            .map(|c| c.text)
            .collect())
    }

    /// Top chunks of one document for `query`, with index and score.
    ///
    /// A missing or unreadable file yields no chunks.
    pub async fn search_in_file_scored(
        &self,
        path: &str,
        query: &str,
        top_k: usize,
    ) -> IndexResult<Vec<ScoredChunk>> {
        let Some(content) = self.read_current(path).await else {
            return Ok(Vec::new());
        };
        let vector = self.embed_query(query).await?;
        self.search_with_vector(path, &content, &vector, top_k).await
    }

    async fn read_current(&self, path: &str) -> Option<Vec<u8>> {
        match tokio::fs::read(self.detector.resolve(path)).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!("Cannot read {} for search: {}", path, err);
                None
            }
        }
    }

    async fn search_with_vector(
        &self,
        path: &str,
        content: &[u8],
        vector: &[f32],
        top_k: usize,
    ) -> IndexResult<Vec<ScoredChunk>> {
        let mut filter = Metadata::new();
        filter.insert("path".to_string(), path.into());
        filter.insert("hash".to_string(), hash_bytes(content).into());

        let matches = retry_async(&self.config.retry, "vector query", || {
            self.vectors.query(vector, top_k, &filter)
        })
        .await
        .map_err(|exhausted| {
            if exhausted.last.is_transient() {
                IndexError::not_ready(format!(
                    "vector query failed after {} attempts: {}",
                    exhausted.attempts, exhausted.last
                ))
            } else {
                exhausted.last
            }
        })?;
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let text = String::from_utf8_lossy(content);
        let chunks = chunk(&text, self.config.chunking.size, self.config.chunking.overlap);
        Ok(recover_chunks(&matches, &chunks))
    }

    /// Search every file in the latest snapshot.
    pub async fn search_corpus(&self, query: &str) -> Result<CorpusSearch> {
        let paths: Vec<String> = self
            .store
            .latest_snapshot(&self.config.snapshot_type)
            .await?
            .map(|s| s.payload.into_keys().collect())
            .unwrap_or_default();
        if paths.is_empty() {
            return Ok(CorpusSearch::NothingIndexed);
        }

        let vector = match self.embed_query(query).await {
            Ok(vector) => vector,
            Err(err) => return Ok(CorpusSearch::Unavailable(err.to_string())),
        };

        let mut blocks = Vec::new();
        let mut queried = 0usize;
        let mut failures = Vec::new();
        for path in &paths {
            let Some(content) = self.read_current(path).await else {
                continue;
            };
            queried += 1;
            match self
                .search_with_vector(path, &content, &vector, self.config.corpus_top_k)
                .await
            {
                Ok(found) if found.is_empty() => {}
                Ok(found) => {
                    let texts: Vec<String> = found.into_iter().map(|c| c.text).collect();
                    blocks.push(format!(
                        "From {}:\n\n{}",
                        display_name(path),
                        texts.join(CHUNK_SEPARATOR)
                    ));
                }
                Err(IndexError::NotReady { reason }) => {
                    return Ok(CorpusSearch::Unavailable(reason));
                }
                Err(err) => {
                    warn!("Search in {} failed: {}", path, err);
                    failures.push(err.to_string());
                }
            }
        }

        if queried > 0 && failures.len() == queried {
            return Ok(CorpusSearch::Unavailable(format!(
                "every file query failed, last error: {}",
                failures.last().map(String::as_str).unwrap_or_default()
            )));
        }
        if blocks.is_empty() {
            Ok(CorpusSearch::NothingFound)
        } else {
            Ok(CorpusSearch::Found(blocks.join(FILE_SEPARATOR)))
        }
    }
}

/// Map matches back to chunk text; indices that are missing, non-integer or
/// out of range are dropped.
pub(crate) fn recover_chunks(matches: &[VectorMatch], chunks: &[String]) -> Vec<ScoredChunk> {
    matches
        .iter()
        .filter_map(|m| {
            let index = chunk_index(m.metadata.get("index")?)?;
            let text = chunks.get(index)?;
            Some(ScoredChunk {
                index,
                score: m.score,
                text: text.clone(),
            })
        })
        .collect()
}

/// A chunk index stored as metadata. Remote indexes may hand integers back as
/// floats (`1.0`), so integral non-negative floats are accepted too.
fn chunk_index(value: &serde_json::Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= usize::MAX as f64 {
        Some(f as usize)
    } else {
        None
    }
}

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
