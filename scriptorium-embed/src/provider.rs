//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector and is 0 for
    /// an empty result.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Provider for any endpoint speaking the OpenAI `/embeddings` protocol.
///
/// A single call makes a single HTTP request per batch. Retrying is left to
/// the caller (see [`crate::retry::retry_async`]) so that indexing and search
/// can react differently when the provider stays down.
#[derive(Clone)]
pub struct OpenAiProvider {
    config: EmbedConfig,
    client: reqwest::Client,
    api_key: String,
    dimension: usize,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.config.endpoint())
            .field("model", &self.config.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    /// Create a provider, reading the API key from the configured environment variable.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::with_api_key(config, api_key)
    }

    /// Create a provider with an explicit API key.
    pub fn with_api_key<S: Into<String>>(config: EmbedConfig, api_key: S) -> Result<Self> {
        config.validate()?;
        let dimension = config.dimension()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        tracing::info!(
            "Embedding provider ready: model={} dims={} endpoint={}",
            config.model,
            dimension,
            config.endpoint()
        );

        Ok(Self {
            config,
            client,
            api_key: api_key.into(),
            dimension,
        })
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    async fn request_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": batch,
        });

        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let embeddings = parse_response(&text)?;
        if embeddings.len() != batch.len() {
            return Err(EmbedError::invalid_response(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(EmbedError::invalid_response(format!(
                "expected dimension {}, got {}",
                self.dimension,
                bad.len()
            )));
        }
        Ok(embeddings)
    }
}

/// Parse an `/embeddings` response body into vectors ordered by `index`.
fn parse_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: EmbeddingsResponse = serde_json::from_str(body)
        .map_err(|e| EmbedError::invalid_response(format!("missing data array: {e}")))?;

    let mut items = parsed.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.request_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbedError::invalid_response("empty data array"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(Vec::new()));
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            tracing::debug!("Embedding batch of {} texts", batch.len());
            embeddings.extend(self.request_batch(batch).await?);
        }

        Ok(EmbeddingResult {
            embeddings,
            dimension: self.dimension,
        })
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        &self.config.model
    }
}
