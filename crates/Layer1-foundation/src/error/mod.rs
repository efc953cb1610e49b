//! Error types for Ensemble
//!
//! All orchestration errors are managed centrally.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Ensemble error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Permission / Approval
    // ========================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ========================================================================
    // Provider
    // ========================================================================
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // ========================================================================
    // Tool
    // ========================================================================
    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool} - {message}")]
    ToolExecution { tool: String, message: String },

    // ========================================================================
    // Agent / Team
    // ========================================================================
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Sub-agent not found: {0}")]
    SubAgentNotFound(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Team error: {0}")]
    Team(String),

    // ========================================================================
    // Execution
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check whether this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::RateLimited(_))
    }

    /// Check whether this error should be shown to the user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::NotFound(_)
                | Error::InvalidInput(_)
                | Error::Cancelled
        )
    }

    /// Tool execution error helper
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From impls (additional conversions)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
