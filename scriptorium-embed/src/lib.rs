//! # scriptorium-embed
//!
//! Text embeddings over any endpoint that speaks the OpenAI `/embeddings`
//! protocol, plus the retry machinery the rest of scriptorium uses for its
//! remote calls.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scriptorium_embed::{EmbedConfig, EmbeddingProvider, OpenAiProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = OpenAiProvider::new(EmbedConfig::default())?;
//!
//! let texts = vec!["Call me Ishmael.".to_string(), "It was a dark and stormy night.".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: endpoint, model and dimension settings
//! - [`provider`]: the [`EmbeddingProvider`] trait and the HTTP implementation
//! - [`retry`]: bounded retry with fixed or exponential backoff
//! - [`error`]: error types, classified as transient or permanent
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.
//! [`EmbedError::is_transient`] tells callers whether a retry could help.

pub mod config;
pub mod error;
pub mod provider;
pub mod retry;

// Re-export main types for easy access
pub use config::{EmbedConfig, known_dimension};
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, OpenAiProvider};
pub use retry::{Backoff, Exhausted, RetryPolicy, Retryable, retry_async};
