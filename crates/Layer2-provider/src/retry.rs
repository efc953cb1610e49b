//! Retry policy for provider connection establishment
//!
//! The policy wraps connection establishment only, never an already
//! consumed stream. Delay schedule:
//! - server/transport errors: `base * 2^attempt`
//! - rate limit (429): `base * 2^(attempt + 1)`, or the server-provided
//!   retry-after hint when present
//! - failure after partial streaming began: fixed `base`
//! - client errors (4xx): never retried
//!
//! Every delay is interruptible by the cancellation token.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// Transient error - retry with exponential backoff
    Retry,

    /// Permanent error - do not retry
    NoRetry,

    /// Rate limited - longer backoff curve, honour server hint if given
    RateLimited { retry_after_ms: Option<u64> },

    /// Stream failed after partial output - fixed delay, then reconnect
    RetryAfterPartialStream,
}

/// Trait for errors that can be classified for retry
pub trait RetryableError {
    fn classify(&self) -> RetryClassification;
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Base delay (milliseconds)
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1500,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), or `None` when the
    /// classification forbids retrying.
    pub fn delay_for(&self, classification: RetryClassification, attempt: u32) -> Option<Duration> {
        let ms = match classification {
            RetryClassification::NoRetry => return None,
            RetryClassification::Retry => self.base_delay_ms << attempt,
            RetryClassification::RateLimited { retry_after_ms } => {
                retry_after_ms.unwrap_or(self.base_delay_ms << (attempt + 1))
            }
            RetryClassification::RetryAfterPartialStream => self.base_delay_ms,
        };
        Some(Duration::from_millis(ms))
    }
}

/// Sleep for `delay`, returning `Cancelled` if the token fires first.
pub async fn backoff(delay: Duration, cancel: &CancellationToken) -> Result<(), ProviderError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
    }
}

/// Execute a connection attempt with the retry policy applied.
pub async fn connect_with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let delay = match config.delay_for(e.classify(), attempt) {
                    Some(delay) => delay,
                    None => {
                        debug!(
                            "{}: non-retryable error on attempt {}: {}",
                            operation_name,
                            attempt + 1,
                            e
                        );
                        return Err(e);
                    }
                };

                if attempt >= config.max_retries {
                    warn!(
                        "{}: max retries ({}) exceeded: {}",
                        operation_name, config.max_retries, e
                    );
                    return Err(e);
                }

                warn!(
                    "{}: attempt {} failed, retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    delay,
                    e
                );

                backoff(delay, cancel).await?;
                attempt += 1;
            }
        }
    }
}
