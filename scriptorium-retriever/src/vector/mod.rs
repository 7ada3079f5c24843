//! Vector index abstraction
//!
//! The indexing pipeline and the retrieval engine only ever talk to a
//! [`VectorIndex`]. Two backends exist:
//!
//! - [`sqlite_index::SqliteVectorIndex`]: f16 vectors in the local SQLite
//!   database, scored in memory
//! - [`http_index::HttpVectorIndex`]: a Pinecone-style HTTP data plane
//!
//! Callers obtain a backend through [`service::VectorService`], which owns the
//! connection state and reconnects lazily.

use async_trait::async_trait;
use scriptorium_embed::Retryable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::storage::Metadata;

pub mod http_index;
pub mod service;
pub mod sqlite_index;

/// Error type for vector index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The service has no usable backend right now
    #[error("Vector index not ready: {reason}")]
    NotReady { reason: String },

    /// Backend configuration is missing or invalid
    #[error("Invalid vector index configuration: {message}")]
    Config { message: String },

    /// Transport failure talking to a remote index
    #[error("Vector index request failed: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    /// Remote index answered with a non-success status
    #[error("Vector index returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Local storage failure
    #[error("Vector storage error: {source}")]
    Storage {
        #[from]
        source: sqlx::Error,
    },

    /// Metadata or response (de)serialization failure
    #[error("Vector index serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

impl IndexError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn not_ready<S: Into<String>>(reason: S) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }
}

impl Retryable for IndexError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Storage { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotReady { .. } | Self::Config { .. } | Self::Serde { .. } => false,
        }
    }
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// One stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    #[serde(rename = "values")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    /// Record for chunk `index` of the document at `path` with content `hash`.
    pub fn for_chunk(path: &str, index: usize, hash: &str, embedding: Vec<f32>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("path".to_string(), path.into());
        metadata.insert("index".to_string(), index.into());
        metadata.insert("hash".to_string(), hash.into());
        Self {
            id: chunk_id(path, index),
            embedding,
            metadata,
        }
    }
}

/// `path:index`
pub fn chunk_id(path: &str, index: usize) -> String {
    format!("{path}:{index}")
}

/// A query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Whether `metadata` satisfies every exact-match condition in `filter`.
pub fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Storage and similarity search of `(id, vector, metadata)` triples.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a record by id
    async fn upsert(&self, record: VectorRecord) -> IndexResult<()>;

    /// Up to `top_k` most similar records whose metadata matches `filter` exactly
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &Metadata,
    ) -> IndexResult<Vec<VectorMatch>>;

    /// Stored records for the given ids; unknown ids are absent from the result
    async fn fetch(&self, ids: &[String]) -> IndexResult<HashMap<String, VectorRecord>>;

    /// Short backend name for logs and status output
    fn name(&self) -> &str;
}
