//! Connection state for the vector index.
//!
//! [`VectorService`] holds the backend behind an explicit state machine:
//!
//! ```text
//! Uninitialized ──initialize()──► Ready(index)
//!        │                           ▲
//!        └──────► Failed(reason) ────┘  (retried on the next operation)
//! ```
//!
//! Every operation goes through [`VectorService::index`], which reconnects when
//! the service is not ready and reports [`IndexError::NotReady`] otherwise.
//! Detection and snapshots keep working while the index is down.

use super::http_index::HttpVectorIndex;
use super::sqlite_index::SqliteVectorIndex;
use super::{IndexError, IndexResult, Metadata, VectorIndex, VectorMatch, VectorRecord};
use crate::config::{VectorBackend, VectorIndexConfig};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Knows how to build a live [`VectorIndex`].
#[async_trait]
pub trait IndexConnector: Send + Sync {
    async fn connect(&self) -> IndexResult<Arc<dyn VectorIndex>>;

    /// Human-readable target, for logs
    fn target(&self) -> String;
}

/// Local index in the scriptorium database.
pub struct SqliteConnector {
    pool: SqlitePool,
}

impl SqliteConnector {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexConnector for SqliteConnector {
    async fn connect(&self) -> IndexResult<Arc<dyn VectorIndex>> {
        Ok(Arc::new(SqliteVectorIndex::new(self.pool.clone()).await?))
    }

    fn target(&self) -> String {
        "local sqlite".to_string()
    }
}

/// Remote Pinecone-style index. The API key is read at connect time so a key
/// exported after startup is picked up on the next reconnect.
pub struct HttpConnector {
    host: String,
    api_key_env: String,
    namespace: Option<String>,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(config: &VectorIndexConfig) -> Self {
        Self {
            host: config.host.clone().unwrap_or_default(),
            api_key_env: config.api_key_env.clone(),
            namespace: config.namespace.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl IndexConnector for HttpConnector {
    async fn connect(&self) -> IndexResult<Arc<dyn VectorIndex>> {
        let api_key = std::env::var(&self.api_key_env).map_err(|_| {
            IndexError::config(format!("{} environment variable not set", self.api_key_env))
        })?;
        let index = HttpVectorIndex::new(&self.host, &api_key, self.namespace.clone(), self.timeout)?;
        index.describe().await?;
        Ok(Arc::new(index))
    }

    fn target(&self) -> String {
        self.host.clone()
    }
}

/// Build the connector selected by configuration.
pub fn connector_for(config: &VectorIndexConfig, pool: &SqlitePool) -> Arc<dyn IndexConnector> {
    match config.backend {
        VectorBackend::Sqlite => Arc::new(SqliteConnector::new(pool.clone())),
        VectorBackend::Http => Arc::new(HttpConnector::new(config)),
    }
}

#[derive(Clone)]
pub enum ServiceState {
    Uninitialized,
    Ready(Arc<dyn VectorIndex>),
    Failed(String),
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Ready(index) => write!(f, "Ready({})", index.name()),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Ready(index) => write!(f, "ready ({})", index.name()),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// The vector index as seen by the rest of the crate.
pub struct VectorService {
    connector: Option<Arc<dyn IndexConnector>>,
    state: RwLock<ServiceState>,
}

impl VectorService {
    /// A service that connects lazily through `connector`.
    pub fn new(connector: Arc<dyn IndexConnector>) -> Self {
        Self {
            connector: Some(connector),
            state: RwLock::new(ServiceState::Uninitialized),
        }
    }

    /// A service that is already connected to `index`.
    pub fn ready(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            connector: None,
            state: RwLock::new(ServiceState::Ready(index)),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.state.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.read().await, ServiceState::Ready(_))
    }

    /// Connect (or reconnect) and record the outcome.
    ///
    /// The state lock is not held while connecting; readers keep seeing the
    /// previous state until the attempt finishes.
    pub async fn initialize(&self) -> IndexResult<Arc<dyn VectorIndex>> {
        if let ServiceState::Ready(index) = &*self.state.read().await {
            return Ok(Arc::clone(index));
        }
        let Some(connector) = &self.connector else {
            return Err(IndexError::not_ready("no connector configured"));
        };

        let outcome = connector.connect().await;

        let mut state = self.state.write().await;
        if let ServiceState::Ready(index) = &*state {
            // a concurrent attempt got there first
            return Ok(Arc::clone(index));
        }

        match outcome {
            Ok(index) => {
                tracing::info!(
                    "Vector index ready: {} ({})",
                    connector.target(),
                    index.name()
                );
                *state = ServiceState::Ready(Arc::clone(&index));
                Ok(index)
            }
            Err(err) => {
                tracing::warn!(
                    "Vector index unavailable at {}: {}",
                    connector.target(),
                    err
                );
                *state = ServiceState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// The live index, reconnecting if needed.
    pub async fn index(&self) -> IndexResult<Arc<dyn VectorIndex>> {
        if let ServiceState::Ready(index) = &*self.state.read().await {
            return Ok(Arc::clone(index));
        }
        self.initialize()
            .await
            .map_err(|err| IndexError::not_ready(err.to_string()))
    }

    pub async fn upsert(&self, record: VectorRecord) -> IndexResult<()> {
        self.index().await?.upsert(record).await
    }

    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &Metadata,
    ) -> IndexResult<Vec<VectorMatch>> {
        self.index().await?.query(vector, top_k, filter).await
    }

    pub async fn fetch(&self, ids: &[String]) -> IndexResult<HashMap<String, VectorRecord>> {
        self.index().await?.fetch(ids).await
    }
}
