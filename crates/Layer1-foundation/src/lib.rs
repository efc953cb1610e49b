//! # ensemble-foundation
//!
//! Foundation layer for Ensemble:
//! - Error: central error type and `Result` alias
//! - Types: shared core types (`TokenUsage`)
//! - Estimator: character-based token estimation
//! - Limiter: cancellable counting semaphore with FIFO admission

pub mod error;
pub mod estimator;
pub mod limiter;
pub mod types;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core types
// ============================================================================
pub use estimator::estimate_tokens;
pub use limiter::{ConcurrencyLimiter, Permit, DEFAULT_MAX_CONCURRENT};
pub use types::TokenUsage;
