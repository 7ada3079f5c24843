//! Error types for the embedding system

/// Result type for embedding operations.
///
/// Convenience alias over [`EmbedError`], used throughout the crate for
/// operations that can fail.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Variants are split along the line callers care about: whether retrying the
/// same request could succeed. [`EmbedError::is_transient`] answers that
/// question and is what [`crate::retry`] consults before backing off.
///
/// # Error Categories
///
/// - **Configuration Errors**: missing credentials or unknown model dimensions
/// - **Request Errors**: transport failures and timeouts talking to the provider
/// - **Status Errors**: the provider answered with a non-success HTTP status
/// - **Response Errors**: a success response that could not be decoded
/// - **Exhaustion**: every attempt allowed by the retry policy failed
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when provider configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Transport level failure (connection refused, timeout, TLS)
    #[error("Embedding request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },

    /// Provider answered with a non-success status
    #[error("Embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Provider response was missing fields or had the wrong shape
    #[error("Invalid embedding response: {message}")]
    InvalidResponse { message: String },

    /// Every attempt permitted by the retry policy failed
    #[error("Embedding failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<EmbedError>,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid response error with a custom message.
    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether retrying the same request might succeed.
    ///
    /// Rate limiting (429), server errors (5xx) and transport failures are
    /// transient. Configuration problems and other client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } | Self::External { .. } | Self::AsyncTask { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse { .. } => true,
            Self::InvalidConfig { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}
