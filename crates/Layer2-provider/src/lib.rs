//! # ensemble-provider
//!
//! LLM provider abstraction layer for Ensemble.
//! The concrete network client lives outside this workspace; this crate
//! defines the streaming contract the Agent Loop Engine consumes.
//!
//! ## Features
//! - Content-block message model (text / thinking / tool use / tool result)
//! - Streaming event vocabulary with incremental tool arguments
//! - Error taxonomy with HTTP classification
//! - Retry policy for connection establishment

pub mod error;
pub mod message;
pub mod retry;
pub mod tool_def;
pub mod r#trait;

// Core traits and types
pub use message::{ContentBlock, Message, MessageRole};
pub use r#trait::{Provider, ProviderRequest, ProviderStream, StreamEvent, TokenUsage};
pub use tool_def::{ToolDef, ToolParameters};

// Error and retry
pub use error::ProviderError;
pub use retry::{backoff, connect_with_retry, RetryClassification, RetryConfig, RetryableError};
