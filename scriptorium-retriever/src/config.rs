//! TOML configuration for scriptorium.
//!
//! Every section and field has a default, so an empty file (or no file at all)
//! yields a working local setup:
//!
//! ```toml
//! [corpus]
//! root = "corpus"
//! extensions = ["txt", "md"]
//!
//! [chunking]
//! size = 900
//! overlap = 120
//!
//! [embedding]
//! model = "text-embedding-3-small"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [embedding.retry]
//! max_attempts = 3
//! backoff = { kind = "fixed", interval_ms = 1000 }
//!
//! [vector_index]
//! backend = "sqlite"          # or "http"
//!
//! [storage]
//! data_dir = "data"
//!
//! [monitor]
//! interval_secs = 60
//! identity_file = "README.md"
//! ```
//!
//! `SCRIPTORIUM_DATA_PATH`, `EMBED_MODEL` and `EMBED_DIM` override the
//! corresponding fields after the file is read.

use crate::retrieval::change_detector::{ChangeDetector, DEFAULT_READ_BUFFER};
use crate::retrieval::chunking_strategy::{ChunkingConfig, FileMatcher};
use anyhow::{Context, Result, bail};
use scriptorium_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbedConfig,
    pub vector_index: VectorIndexConfig,
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
    pub retrieval: RetrievalConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub ignored_dirs: Vec<String>,
    /// File names or root-relative paths matched regardless of extension
    pub extra_files: Vec<String>,
    pub read_buffer_bytes: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("corpus"),
            extensions: vec!["txt".to_string(), "md".to_string()],
            ignored_dirs: [
                ".git",
                "node_modules",
                "target",
                "__pycache__",
                ".pytest_cache",
                "data",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extra_files: Vec::new(),
            read_buffer_bytes: DEFAULT_READ_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Sqlite,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub backend: VectorBackend,
    /// Index host for the http backend
    pub host: Option<String>,
    pub api_key_env: String,
    pub namespace: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Sqlite,
            host: None,
            api_key_env: "PINECONE_API_KEY".to_string(),
            namespace: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_file: "scriptorium.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Routed to its own change handler and always part of the corpus
    pub identity_file: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            identity_file: Some("README.md".to_string()),
        }
    }
}

impl MonitorConfig {
    /// Poll interval, never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Matches per file when searching the whole corpus
    pub corpus_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            corpus_top_k: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Files indexed concurrently
    pub concurrency: usize,
    pub snapshot_type: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            snapshot_type: "literary_vector".to_string(),
        }
    }
}

impl Config {
    /// Read, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::debug!("No config at {}, using defaults", path.display());
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SCRIPTORIUM_DATA_PATH`, `EMBED_MODEL` and `EMBED_DIM` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = lookup("SCRIPTORIUM_DATA_PATH").filter(|v| !v.is_empty()) {
            self.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(model) = lookup("EMBED_MODEL").filter(|v| !v.is_empty()) {
            self.embedding.model = model;
        }
        if let Some(dims) = lookup("EMBED_DIM").filter(|v| !v.is_empty()) {
            let dims = dims
                .trim()
                .parse::<usize>()
                .with_context(|| format!("EMBED_DIM is not a number: {dims}"))?;
            self.embedding.dims = Some(dims);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.size == 0 {
            bail!("chunking.size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.size {
            tracing::warn!(
                "chunking.overlap ({}) >= chunking.size ({}); windows advance one character at a time",
                self.chunking.overlap,
                self.chunking.size
            );
        }
        if self.pipeline.concurrency == 0 {
            bail!("pipeline.concurrency must be > 0");
        }
        if self.pipeline.snapshot_type.trim().is_empty() {
            bail!("pipeline.snapshot_type must not be empty");
        }
        if self.embedding.retry.max_attempts == 0 {
            bail!("embedding.retry.max_attempts must be > 0");
        }
        if self.retrieval.top_k == 0 || self.retrieval.corpus_top_k == 0 {
            bail!("retrieval.top_k and retrieval.corpus_top_k must be > 0");
        }
        if self.corpus.extensions.is_empty() && self.corpus.extra_files.is_empty() {
            bail!("corpus.extensions must list at least one extension");
        }
        if self.vector_index.backend == VectorBackend::Http
            && self
                .vector_index
                .host
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            bail!("vector_index.host is required when backend is 'http'");
        }
        Ok(())
    }

    /// The corpus matcher, including the identity file.
    pub fn matcher(&self) -> FileMatcher {
        let matcher = FileMatcher::new(
            &self.corpus.extensions,
            &self.corpus.ignored_dirs,
            &self.corpus.extra_files,
        );
        match &self.monitor.identity_file {
            Some(identity) => matcher.with_extra_file(identity.clone()),
            None => matcher,
        }
    }

    /// Change detector over the configured corpus root.
    pub fn detector(&self) -> ChangeDetector {
        ChangeDetector::new(&self.corpus.root, self.matcher())
            .with_buffer_size(self.corpus.read_buffer_bytes)
    }
}
