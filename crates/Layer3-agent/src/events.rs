//! Agent events
//!
//! Closed vocabulary of everything the engine can tell a consumer.
//! Consumers receive these over an unbounded channel; a dropped
//! receiver never stalls the loop.

use ensemble_foundation::TokenUsage;
use serde_json::Value;

/// Why the agent loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEndReason {
    /// Model produced a final response with no tool calls
    Completed,

    /// Iteration ceiling reached
    MaxIterations,

    /// Cancellation token fired
    Aborted,

    /// Unrecoverable error (retries exhausted or non-retryable)
    Error(String),
}

/// Why a single iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStop {
    /// Model requested tools; results appended, loop continues
    ToolUse,

    /// Model finished its turn with no tool calls
    EndTurn,
}

/// Compression tier applied to the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionTier {
    /// Lightweight in-place trimming of old bulky blocks
    Pre,

    /// Zone-based summarization of the conversation middle
    Full,
}

/// Events emitted by the agent loop
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A new iteration began (1-indexed)
    IterationStart { iteration: u32 },

    /// Streaming text from the model
    TextDelta { text: String },

    /// Streaming thinking content from the model
    ThinkingDelta { text: String },

    /// Tool call arguments are streaming in; `partial_input` is a
    /// best-effort preview repaired from the JSON prefix
    ToolCallStreaming {
        id: String,
        name: String,
        partial_input: Option<Value>,
    },

    /// Tool call is waiting on an approval decision
    ToolCallPendingApproval { id: String, name: String },

    /// Tool call was approved (or needed no approval) and is executing
    ToolCallRunning { id: String, name: String },

    /// Tool call finished successfully
    ToolCallCompleted {
        id: String,
        name: String,
        output: String,
        duration_ms: u64,
    },

    /// Tool call was denied or failed
    ToolCallFailed {
        id: String,
        name: String,
        error: String,
    },

    /// Context compression is about to run
    CompressionStart {
        tier: CompressionTier,
        messages_before: usize,
    },

    /// Context compression finished
    Compressed {
        tier: CompressionTier,
        messages_before: usize,
        messages_after: usize,
    },

    /// Token usage reported by the provider
    Usage(TokenUsage),

    /// The iteration finished
    IterationEnd {
        iteration: u32,
        stop: IterationStop,
    },

    /// The loop is over; emitted exactly once per run
    LoopEnd { reason: LoopEndReason },
}
