//! Two-tier context compression
//!
//! Tier 1 (pre-compression) cheaply blanks old bulky blocks in place.
//! Tier 2 (full compression) rebuilds the history around three zones:
//! the first genuine user message (kept verbatim), a summarized middle,
//! and a recent tail kept verbatim. Both tiers treat the input history
//! as immutable and return a new vector; the caller swaps it in only
//! on success.

use crate::events::CompressionTier;
use crate::inbox::TEAM_MESSAGE_PREFIX;
use async_trait::async_trait;
use ensemble_foundation::{estimate_tokens, Result};
use ensemble_provider::{ContentBlock, Message, MessageRole};
use tracing::debug;

/// Replaces oversized tool results during pre-compression
pub const PLACEHOLDER_TOOL_RESULT: &str = "[tool result omitted]";

/// Replaces thinking blocks during pre-compression
pub const PLACEHOLDER_THINKING: &str = "[thinking omitted]";

/// Boundary adjustment gives up after this many attempts
const MAX_BOUNDARY_ADJUSTMENTS: usize = 20;

/// Fixed per-message token overhead (role framing, ids)
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Produces the middle-zone summary for full compression.
/// Typically backed by a separate provider call.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

/// Compressor tuning
#[derive(Debug, Clone)]
pub struct CompressorConfig {
    /// Context window of the active model (tokens)
    pub context_window: usize,

    /// Usage ratio at which pre-compression kicks in
    pub precompress_threshold: f64,

    /// Usage ratio at which full compression kicks in
    pub full_threshold: f64,

    /// Messages at the tail kept verbatim by pre-compression
    pub keep_recent: usize,

    /// Tool result character length above which pre-compression blanks it
    pub tool_result_limit: usize,

    /// Standing context (plan, constraints) re-injected verbatim ahead
    /// of the summary on every full compression
    pub pinned: Option<String>,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            context_window: 200_000,
            precompress_threshold: 0.65,
            full_threshold: 0.80,
            keep_recent: 6,
            tool_result_limit: 200,
            pinned: None,
        }
    }
}

impl CompressorConfig {
    pub fn new(context_window: usize) -> Self {
        Self {
            context_window,
            ..Default::default()
        }
    }

    pub fn with_pinned(mut self, pinned: impl Into<String>) -> Self {
        self.pinned = Some(pinned.into());
        self
    }

    /// Which tier the current history calls for, if any
    pub fn evaluate(&self, history: &[Message]) -> Option<CompressionTier> {
        if self.context_window == 0 {
            return None;
        }
        let usage = estimate_history_tokens(history) as f64 / self.context_window as f64;
        if usage >= self.full_threshold {
            Some(CompressionTier::Full)
        } else if usage >= self.precompress_threshold {
            Some(CompressionTier::Pre)
        } else {
            None
        }
    }
}

/// Estimate the token footprint of a history
pub fn estimate_history_tokens(history: &[Message]) -> usize {
    history
        .iter()
        .map(|message| {
            let blocks: usize = message
                .blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => estimate_tokens(text),
                    ContentBlock::Thinking { text } => estimate_tokens(text),
                    ContentBlock::ToolUse { name, input, .. } => {
                        estimate_tokens(name) + estimate_tokens(&input.to_string())
                    }
                    ContentBlock::ToolResult { content, .. } => estimate_tokens(content),
                })
                .sum();
            blocks + MESSAGE_OVERHEAD_TOKENS
        })
        .sum()
}

/// Two-tier history compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressorConfig,
}

impl Compressor {
    pub fn new(config: CompressorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Tier 1: blank old thinking blocks and oversized tool results,
    /// keeping the most recent messages verbatim. Idempotent.
    pub fn precompress(&self, history: &[Message]) -> Vec<Message> {
        if history.len() <= self.config.keep_recent {
            return history.to_vec();
        }

        let boundary = history.len() - self.config.keep_recent;
        let mut result = Vec::with_capacity(history.len());

        for (i, message) in history.iter().enumerate() {
            if i >= boundary {
                result.push(message.clone());
                continue;
            }

            let mut compressed = message.clone();
            for block in &mut compressed.blocks {
                match block {
                    ContentBlock::ToolResult { content, .. }
                        if content.chars().count() > self.config.tool_result_limit =>
                    {
                        *content = PLACEHOLDER_TOOL_RESULT.to_string();
                    }
                    ContentBlock::Thinking { text } if text != PLACEHOLDER_THINKING => {
                        *text = PLACEHOLDER_THINKING.to_string();
                    }
                    _ => {}
                }
            }
            result.push(compressed);
        }

        result
    }

    /// Tier 2: keep the first genuine user message and a recent tail,
    /// summarize everything in between through `summarizer`.
    ///
    /// On summarizer failure the original history is untouched; the
    /// caller decides the fallback.
    pub async fn compress_full(
        &self,
        history: &[Message],
        summarizer: &dyn Summarizer,
    ) -> Result<Vec<Message>> {
        let total = history.len();
        let anchor = first_genuine_user_index(history).unwrap_or(0);

        let tail_len = (total / 5).clamp(4, 10);
        let mut tail_start = total.saturating_sub(tail_len).max(anchor + 1);

        // Push the tail boundary past any tool-result whose invocation
        // lives outside the tail, whole pairs at a time.
        for _ in 0..MAX_BOUNDARY_ADJUSTMENTS {
            match first_orphan_result_in_tail(history, tail_start) {
                Some(index) => tail_start = index + 1,
                None => break,
            }
        }

        let middle: Vec<&Message> = history[..tail_start]
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != anchor)
            .map(|(_, m)| m)
            .collect();

        if middle.is_empty() {
            return Ok(sanitize_orphans(history));
        }

        let transcript = render_transcript(&middle);
        let summary = summarizer.summarize(&transcript).await?;

        debug!(
            middle = middle.len(),
            tail = total - tail_start,
            "full compression summarized conversation middle"
        );

        let mut result = Vec::with_capacity(total - tail_start + 3);
        result.push(history[anchor].clone());
        if let Some(pinned) = &self.config.pinned {
            result.push(Message::user(pinned.clone()));
        }
        result.push(Message::user(format!(
            "Previous conversation summary:\n{}\n\nContinuing from here.",
            summary
        )));
        result.extend(history[tail_start..].iter().cloned());

        Ok(sanitize_orphans(&result))
    }
}

/// Index of the first user message that is neither a tool-result
/// carrier nor an injected inter-agent message.
fn first_genuine_user_index(history: &[Message]) -> Option<usize> {
    history.iter().position(|m| {
        m.role == MessageRole::User
            && !m.is_tool_only()
            && !m.text().trim_start().starts_with(TEAM_MESSAGE_PREFIX)
    })
}

/// First tail message holding a tool result whose invocation is not in
/// the tail.
fn first_orphan_result_in_tail(history: &[Message], tail_start: usize) -> Option<usize> {
    if tail_start >= history.len() {
        return None;
    }

    let tail_use_ids: Vec<&str> = history[tail_start..]
        .iter()
        .flat_map(|m| m.tool_use_ids())
        .collect();

    history[tail_start..]
        .iter()
        .position(|m| {
            m.tool_result_ids()
                .iter()
                .any(|id| !tail_use_ids.contains(id))
        })
        .map(|offset| tail_start + offset)
}

/// Flatten messages into a plain-text transcript for the summarizer
fn render_transcript(messages: &[&Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        for block in &message.blocks {
            match block {
                ContentBlock::Text { text } => {
                    out.push_str(&format!("[{}] {}\n", role, text));
                }
                ContentBlock::Thinking { text } => {
                    out.push_str(&format!("[{} thinking] {}\n", role, text));
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    out.push_str(&format!("[{}] called {}({})\n", role, name, input));
                }
                ContentBlock::ToolResult { content, is_error, .. } => {
                    let tag = if *is_error { "tool error" } else { "tool result" };
                    out.push_str(&format!("[{}] {}\n", tag, content));
                }
            }
        }
    }
    out
}

/// Rewrite tool blocks whose counterpart is missing into plain text.
/// Always the last step of any compression, so the provider never sees
/// a structurally invalid history.
pub fn sanitize_orphans(history: &[Message]) -> Vec<Message> {
    let use_ids: Vec<&str> = history.iter().flat_map(|m| m.tool_use_ids()).collect();
    let result_ids: Vec<&str> = history.iter().flat_map(|m| m.tool_result_ids()).collect();

    history
        .iter()
        .map(|message| {
            let mut sanitized = message.clone();
            for block in &mut sanitized.blocks {
                match block {
                    ContentBlock::ToolUse { id, name, input } if !result_ids.contains(&id.as_str()) => {
                        *block = ContentBlock::text(format!(
                            "[previous tool call: {}({})]",
                            name, input
                        ));
                    }
                    ContentBlock::ToolResult { tool_use_id, content, .. }
                        if !use_ids.contains(&tool_use_id.as_str()) =>
                    {
                        *block = ContentBlock::text(format!("[previous tool result: {}]", content));
                    }
                    _ => {}
                }
            }
            // A tool-role message stripped of every result block is no
            // longer valid as a tool turn
            if sanitized.role == MessageRole::Tool
                && !sanitized.blocks.iter().any(|b| b.is_tool_result())
            {
                sanitized.role = MessageRole::User;
            }
            sanitized
        })
        .collect()
}
