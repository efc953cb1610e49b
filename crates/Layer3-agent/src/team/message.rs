//! Inter-agent messages

use super::member::MemberId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Member(MemberId),
    /// Every registered inbox, sender excluded
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamMessageKind {
    /// Direct message between agents
    Message,

    /// Broadcast to the whole team
    Broadcast,

    /// Ask a member to wind down gracefully
    ShutdownRequest,

    /// Member acknowledging a shutdown request
    ShutdownResponse,
}

/// A message routed through the team bus
#[derive(Debug, Clone)]
pub struct TeamMessage {
    pub id: Uuid,
    pub kind: TeamMessageKind,

    /// Sender label (member short id, or "lead")
    pub from: String,

    pub to: Recipient,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl TeamMessage {
    fn build(kind: TeamMessageKind, from: impl Into<String>, to: Recipient, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            from: from.into(),
            to,
            content: content.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn direct(from: impl Into<String>, to: MemberId, content: impl Into<String>) -> Self {
        Self::build(TeamMessageKind::Message, from, Recipient::Member(to), content)
    }

    pub fn broadcast(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self::build(TeamMessageKind::Broadcast, from, Recipient::All, content)
    }

    pub fn shutdown_request(from: impl Into<String>, to: MemberId) -> Self {
        Self::build(
            TeamMessageKind::ShutdownRequest,
            from,
            Recipient::Member(to),
            "please finish your current work and stop",
        )
    }

    pub fn shutdown_response(from: impl Into<String>, to: MemberId, content: impl Into<String>) -> Self {
        Self::build(TeamMessageKind::ShutdownResponse, from, Recipient::Member(to), content)
    }
}
