//! Provider trait and streaming events
//!
//! The provider is an opaque streaming collaborator. Connection
//! establishment (`open_stream`) can fail with a classified
//! `ProviderError` and is the only thing the retry policy wraps; once a
//! stream is open, failures surface as `StreamEvent::Error`.

use crate::error::ProviderError;
use crate::{Message, ToolDef};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

// Re-export TokenUsage from Layer1-foundation (standard type)
pub use ensemble_foundation::TokenUsage;

/// Events emitted during streaming
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text content delta
    TextDelta(String),

    /// Thinking/reasoning content delta (for models that support it)
    ThinkingDelta(String),

    /// Tool call started (name known, arguments still streaming)
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },

    /// Tool call argument fragment (possibly invalid JSON prefix)
    ToolInputDelta {
        index: usize,
        arguments_delta: String,
    },

    /// Tool call arguments complete
    ToolUseEnd { index: usize },

    /// Token usage update
    Usage(TokenUsage),

    /// Stream completed normally
    Done,

    /// Stream failed after it started
    Error(ProviderError),
}

/// A request to open a streaming completion
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Conversation history (structurally valid - no orphan tool blocks)
    pub messages: Vec<Message>,

    /// Tool definitions visible to the model
    pub tools: Vec<ToolDef>,

    /// System prompt
    pub system_prompt: Option<String>,
}

/// Boxed stream of provider events
pub type ProviderStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// LLM Provider trait
///
/// Implement this trait to plug in a concrete model client.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Context window of the active model (tokens)
    fn context_window(&self) -> u32 {
        200_000
    }

    /// Open a streaming request.
    ///
    /// An `Err` here means connection establishment failed and is
    /// subject to the retry policy. Errors after the stream opened are
    /// delivered in-band as `StreamEvent::Error`.
    async fn open_stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError>;
}
