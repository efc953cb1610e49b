//! Team members

use super::task::TaskId;
use chrono::{DateTime, Utc};
use ensemble_foundation::TokenUsage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Team-scoped member identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form for logs and message headers
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Registered, nothing assigned
    Idle,

    /// Claimed a task, waiting on a concurrency slot
    Waiting,

    /// Loop running
    Working,

    /// Finished or shut down
    Stopped,
}

/// Observable state of one team member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: MemberId,
    pub name: String,
    pub status: MemberStatus,
    pub current_task: Option<TaskId>,
    pub tool_calls: u32,
    pub usage: TokenUsage,
    pub started_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(),
            name: name.into(),
            status: MemberStatus::Idle,
            current_task: None,
            tool_calls: 0,
            usage: TokenUsage::default(),
            started_at: Utc::now(),
        }
    }
}
