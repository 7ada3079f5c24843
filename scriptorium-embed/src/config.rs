//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Known OpenAI-compatible embedding models and their output dimensions.
const KNOWN_MODELS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
];

/// Look up the output dimension of a well-known model.
pub fn known_dimension(model: &str) -> Option<usize> {
    KNOWN_MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, dims)| *dims)
}

/// Configuration for an OpenAI-compatible embedding endpoint.
///
/// Every field has a default so an empty `[embedding]` table is valid.
/// The API key itself never lives in the config; only the name of the
/// environment variable that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Base URL of the API, without the `/embeddings` suffix
    pub base_url: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Output dimension. Required for models not in the built-in table.
    pub dims: Option<usize>,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Maximum number of texts sent in one request
    pub batch_size: usize,
    /// Retry policy applied by callers around each embedding request
    pub retry: RetryPolicy,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            batch_size: 32,
            retry: RetryPolicy::default(),
        }
    }
}

impl EmbedConfig {
    /// Set the model (builder style)
    pub fn with_model<S: Into<String>>(self, model: S) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    /// Set an explicit output dimension (builder style)
    pub fn with_dims(self, dims: usize) -> Self {
        Self {
            dims: Some(dims),
            ..self
        }
    }

    /// Set the API base URL (builder style)
    pub fn with_base_url<S: Into<String>>(self, base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    /// Set the retry policy (builder style)
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// Set the batch size (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Resolve the embedding dimension.
    ///
    /// An explicit `dims` wins; otherwise the model must be one of the
    /// well-known models.
    pub fn dimension(&self) -> Result<usize> {
        match self.dims.or_else(|| known_dimension(&self.model)) {
            Some(0) => Err(EmbedError::invalid_config("embedding dims must be > 0")),
            Some(dims) => Ok(dims),
            None => Err(EmbedError::invalid_config(format!(
                "unknown dimension for model '{}'; set embedding.dims",
                self.model
            ))),
        }
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(EmbedError::invalid_config(format!(
                "{} environment variable not set",
                self.api_key_env
            ))),
        }
    }

    /// Full URL of the embeddings endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    /// Check the fields that can be validated without network access.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(EmbedError::invalid_config("embedding.model must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("embedding.batch_size must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(EmbedError::invalid_config(
                "embedding.timeout_secs must be > 0",
            ));
        }
        self.dimension()?;
        Ok(())
    }
}
