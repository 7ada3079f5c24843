//! scriptorium-retriever: incremental indexing and semantic retrieval over a
//! directory of text documents
//!
//! Documents are identified by content hash. A pass re-embeds only what
//! changed since the last snapshot, and queries filter on the current hash so
//! they never return text from an outdated version of a file.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: change detection, chunking, the indexing pipeline,
//!   retrieval, memory entries and the directory monitor
//! - **[`storage`]**: snapshots, per-file state and the change log in SQLite
//! - **[`vector`]**: the vector index abstraction and its backends
//! - **[`status`]**: human-readable and JSON status reports
//! - **[`config`]**: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scriptorium_embed::OpenAiProvider;
//! use scriptorium_retriever::config::Config;
//! use scriptorium_retriever::retrieval::indexing_engine::{IndexingEngine, IndexingEngineConfig};
//! use scriptorium_retriever::storage::sqlite_store::SqliteStore;
//! use scriptorium_retriever::vector::service::{VectorService, connector_for};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load_or_default(Path::new("scriptorium.toml"))?;
//! let store = SqliteStore::open(&config.storage.db_path()).await?;
//! let vectors = Arc::new(VectorService::new(connector_for(&config.vector_index, store.pool())));
//! let provider = Arc::new(OpenAiProvider::new(config.embedding.clone())?);
//!
//! let engine = IndexingEngine::new(
//!     IndexingEngineConfig::from_config(&config),
//!     config.detector(),
//!     provider,
//!     vectors,
//!     store,
//! );
//! let report = engine.run_pass().await?;
//! println!("indexed {} files", report.indexed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! DirectoryMonitor ──► IndexingEngine ──► Chunker ──► EmbeddingProvider
//!        │                  │                              │
//!        ▼                  ▼                              ▼
//!   file_state         snapshots ◄── ChangeDetector    VectorService ◄── RetrievalEngine
//! ```

pub mod config;
pub mod retrieval;
pub mod status;
pub mod storage;
pub mod vector;

#[cfg(test)]
mod test_support;
