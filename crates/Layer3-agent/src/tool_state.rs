//! Tool call lifecycle
//!
//! Streaming -> PendingApproval -> Running -> Completed, with Error
//! reachable from every non-terminal state. Transitions only move
//! forward; there is no setter that could skip a state.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::partial_json;

/// Lifecycle state of a single tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    /// Arguments still streaming from the provider
    Streaming,

    /// Arguments complete, waiting on an approval decision
    PendingApproval,

    /// Executing
    Running,

    /// Finished successfully (terminal)
    Completed,

    /// Denied, rejected, or failed (terminal)
    Error,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolCallStatus::Completed | ToolCallStatus::Error)
    }
}

/// A tool call tracked through its lifecycle
#[derive(Debug, Clone)]
pub struct ToolCallState {
    pub id: String,
    pub name: String,

    /// Finalized arguments (valid once streaming ends)
    pub input: Value,

    /// Output on success
    pub output: Option<String>,

    /// Error message on denial or failure
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    status: ToolCallStatus,

    /// Raw argument JSON accumulated during streaming
    buffer: String,
}

impl ToolCallState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: Value::Null,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            status: ToolCallStatus::Streaming,
            buffer: String::new(),
        }
    }

    pub fn status(&self) -> ToolCallStatus {
        self.status
    }

    /// Append a streamed argument fragment
    pub fn append_input_delta(&mut self, delta: &str) {
        debug_assert_eq!(self.status, ToolCallStatus::Streaming);
        self.buffer.push_str(delta);
    }

    /// Best-effort preview of the arguments streamed so far
    pub fn preview(&self) -> Option<Value> {
        partial_json::parse_partial(&self.buffer)
    }

    /// Parse the accumulated buffer as the final arguments.
    ///
    /// Malformed JSON moves the call to `Error` and reports `false`;
    /// the caller synthesizes an error result instead of executing.
    pub fn finalize_input(&mut self) -> bool {
        debug_assert_eq!(self.status, ToolCallStatus::Streaming);

        if self.buffer.trim().is_empty() {
            // Tools without parameters stream no argument deltas
            self.input = serde_json::json!({});
            return true;
        }

        match serde_json::from_str(&self.buffer) {
            Ok(value) => {
                self.input = value;
                true
            }
            Err(e) => {
                self.fail(format!("invalid tool arguments: {}", e));
                false
            }
        }
    }

    /// Streaming -> PendingApproval
    pub fn require_approval(&mut self) {
        debug_assert_eq!(self.status, ToolCallStatus::Streaming);
        self.status = ToolCallStatus::PendingApproval;
    }

    /// Streaming | PendingApproval -> Running
    pub fn start_running(&mut self) {
        debug_assert!(matches!(
            self.status,
            ToolCallStatus::Streaming | ToolCallStatus::PendingApproval
        ));
        self.status = ToolCallStatus::Running;
    }

    /// Running -> Completed
    pub fn complete(&mut self, output: impl Into<String>) {
        debug_assert_eq!(self.status, ToolCallStatus::Running);
        self.output = Some(output.into());
        self.completed_at = Some(Utc::now());
        self.status = ToolCallStatus::Completed;
    }

    /// Any non-terminal state -> Error
    pub fn fail(&mut self, error: impl Into<String>) {
        debug_assert!(!self.status.is_terminal());
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.status = ToolCallStatus::Error;
    }
}
