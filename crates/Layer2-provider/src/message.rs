//! Message types for LLM communication
//!
//! A message is an ordered list of content blocks. At the transport
//! boundary every `ToolUse` block must have a matching `ToolResult`
//! block somewhere in the history; orphans are rewritten by the
//! compressor's sanitization pass before any provider call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// One block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },

    /// Model reasoning (for models that expose it)
    Thinking { text: String },

    /// A tool invocation requested by the assistant
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Result of a tool invocation
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,

    /// Role of this message
    pub role: MessageRole,

    /// Ordered content blocks
    pub blocks: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with a single text block
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            blocks: vec![ContentBlock::text(content)],
        }
    }

    /// Create an assistant message with a single text block
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            blocks: vec![ContentBlock::text(content)],
        }
    }

    /// Create an assistant message from blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            blocks,
        }
    }

    /// Create a tool message carrying one or more tool results
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        debug_assert!(blocks.iter().all(ContentBlock::is_tool_result));
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Tool,
            blocks,
        }
    }

    /// Concatenated text content of all text blocks
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// IDs of tool-use blocks in this message
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// IDs referenced by tool-result blocks in this message
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the message contains any tool-use or tool-result block
    pub fn has_tool_blocks(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| b.is_tool_use() || b.is_tool_result())
    }

    /// Whether the message consists of tool blocks only (no text)
    pub fn is_tool_only(&self) -> bool {
        !self.blocks.is_empty()
            && self
                .blocks
                .iter()
                .all(|b| b.is_tool_use() || b.is_tool_result())
    }
}
