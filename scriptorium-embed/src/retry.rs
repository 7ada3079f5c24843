//! Bounded retry with configurable backoff.
//!
//! Both embedding calls and vector index calls are remote operations that fail
//! transiently. [`retry_async`] runs an operation until it succeeds, returns a
//! permanent error, or the [`RetryPolicy`] runs out of attempts. Callers decide
//! what to do with an [`Exhausted`] result: the indexing pipeline degrades to a
//! sentinel vector, the retrieval engine reports itself unavailable.
//!
//! ```toml
//! [embedding.retry]
//! max_attempts = 3
//! backoff = { kind = "fixed", interval_ms = 1000 }
//!
//! # or
//! backoff = { kind = "exponential", base_ms = 250, max_ms = 8000 }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::EmbedError;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { interval_ms: u64 },
    /// `base_ms * 2^(retry - 1)`, capped at `max_ms`
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before the given retry (1 = first retry after the initial attempt).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let shift = retry.saturating_sub(1).min(31);
                let factor = 1u64 << shift;
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { interval_ms: 1000 }
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed {
                interval_ms: interval.as_millis() as u64,
            },
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base_ms: base.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            },
        }
    }

    /// Single attempt, no waiting. Useful in tests and one-shot CLI calls.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }
}

/// Errors that know whether another attempt is worthwhile.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for EmbedError {
    fn is_transient(&self) -> bool {
        EmbedError::is_transient(self)
    }
}

/// The operation never succeeded within the policy.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts actually made (less than the maximum if a permanent error stopped early)
    pub attempts: u32,
    pub last: E,
}

impl Exhausted<EmbedError> {
    pub fn into_embed_error(self) -> EmbedError {
        EmbedError::RetriesExhausted {
            attempts: self.attempts,
            last: Box::new(self.last),
        }
    }
}

/// Run `op` under `policy`.
///
/// Transient errors are logged at debug level and retried after the backoff
/// delay; a permanent error ends the loop immediately.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> std::result::Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !err.is_transient() {
                    return Err(Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = policy.backoff.delay(attempt);
                tracing::debug!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label,
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
