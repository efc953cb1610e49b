//! Provider-specific error types
//!
//! `ProviderError` covers failures of the opaque streaming provider and
//! classifies them for the retry policy. Conversion into the foundation
//! `Error` is provided for engine-level reporting.

use crate::retry::{RetryClassification, RetryableError};
use ensemble_foundation::Error as FoundationError;
use thiserror::Error;

/// Errors that can occur during provider operations
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// API key is missing or invalid (4xx, never retried)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limit exceeded (429)
    #[error("Rate limit exceeded{}", .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    /// Context length exceeded (4xx)
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// Server error (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Network error (connection failed, DNS, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid request (bad parameters, 4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid response from the provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Failure after streaming already began
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Operation was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Unknown error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RetryableError for ProviderError {
    fn classify(&self) -> RetryClassification {
        match self {
            // Rate limited - retry with the longer backoff curve
            ProviderError::RateLimited { retry_after_ms } => RetryClassification::RateLimited {
                retry_after_ms: *retry_after_ms,
            },

            // Server errors and transport failures - retry
            ProviderError::ServerError(_) | ProviderError::Network(_) => {
                RetryClassification::Retry
            }

            // Stream already started - fixed delay, then reconnect
            ProviderError::StreamError(_) => RetryClassification::RetryAfterPartialStream,

            // Client errors and cancellation - never retried
            ProviderError::Authentication(_)
            | ProviderError::ContextLengthExceeded(_)
            | ProviderError::InvalidRequest(_)
            | ProviderError::InvalidResponse(_)
            | ProviderError::Cancelled
            | ProviderError::Unknown(_) => RetryClassification::NoRetry,
        }
    }
}

impl ProviderError {
    /// Create from HTTP status code and body
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Authentication(body.to_string()),
            429 => ProviderError::RateLimited {
                retry_after_ms: extract_retry_after(body),
            },
            400 => {
                if body.contains("context") || body.contains("too long") || body.contains("token") {
                    ProviderError::ContextLengthExceeded(body.to_string())
                } else {
                    ProviderError::InvalidRequest(body.to_string())
                }
            }
            400..=499 => ProviderError::InvalidRequest(format!("HTTP {}: {}", status, body)),
            500..=599 => ProviderError::ServerError(body.to_string()),
            _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Try to extract a retry-after value from an error body (milliseconds)
fn extract_retry_after(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(secs) = json
            .get("error")
            .and_then(|e| e.get("retry_after"))
            .and_then(|v| v.as_f64())
        {
            return Some((secs * 1000.0) as u64);
        }
    }
    None
}

// ============================================================================
// foundation::Error conversion
// ============================================================================

impl From<ProviderError> for FoundationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => FoundationError::Cancelled,
            ProviderError::RateLimited { retry_after_ms } => FoundationError::RateLimited(
                retry_after_ms
                    .map(|ms| format!("Retry after {}ms", ms))
                    .unwrap_or_else(|| "Rate limited".to_string()),
            ),
            ProviderError::InvalidRequest(msg) => FoundationError::InvalidInput(msg),
            other => FoundationError::Provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert!(matches!(
            ProviderError::from_http_status(401, "bad key"),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            ProviderError::from_http_status(429, "{}"),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_http_status(500, "oops"),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            ProviderError::from_http_status(400, "prompt too long, token limit"),
            ProviderError::ContextLengthExceeded(_)
        ));
    }

    #[test]
    fn test_retry_after_extraction() {
        let err = ProviderError::from_http_status(429, r#"{"error": {"retry_after": 2.5}}"#);
        match err {
            ProviderError::RateLimited { retry_after_ms } => {
                assert_eq!(retry_after_ms, Some(2500));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            ProviderError::ServerError("x".into()).classify(),
            RetryClassification::Retry
        );
        assert_eq!(
            ProviderError::Authentication("x".into()).classify(),
            RetryClassification::NoRetry
        );
        assert_eq!(
            ProviderError::StreamError("x".into()).classify(),
            RetryClassification::RetryAfterPartialStream
        );
    }
}
