//! Inbound message queue
//!
//! Messages can be appended at any time from any task; the agent loop
//! drains the queue only at iteration boundaries, so a mid-iteration
//! arrival waits for the next turn.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Prefix stamped on inter-agent messages injected into a history.
/// The compressor uses it to tell these apart from genuine user input.
pub const TEAM_MESSAGE_PREFIX: &str = "[team]";

/// A message queued for an agent
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sender label (member id short form, or "lead")
    pub from: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            content: content.into(),
            received_at: Utc::now(),
        }
    }

    /// Render as a user-role message body for history injection
    pub fn render(&self) -> String {
        format!(
            "{} message from {}: {}",
            TEAM_MESSAGE_PREFIX, self.from, self.content
        )
    }
}

/// Shared append/drain queue feeding one agent loop
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    inner: Arc<Mutex<Vec<InboundMessage>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: InboundMessage) {
        self.inner.lock().push(message);
    }

    /// Take everything queued so far, preserving arrival order
    pub fn drain(&self) -> Vec<InboundMessage> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_takes_all_in_order() {
        let inbox = Inbox::new();
        inbox.push(InboundMessage::new("a", "first"));
        inbox.push(InboundMessage::new("b", "second"));

        let drained = inbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].content, "first");
        assert_eq!(drained[1].content, "second");
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_render_carries_team_prefix() {
        let msg = InboundMessage::new("lead", "status?");
        assert!(msg.render().starts_with(TEAM_MESSAGE_PREFIX));
        assert!(msg.render().contains("from lead"));
    }
}
