//! Multi-agent team coordination
//!
//! A team is a lead agent plus worker members spawned per task. The
//! scheduler owns the task board and drives dispatch; the bus routes
//! messages between inboxes.

pub mod bus;
pub mod member;
pub mod message;
pub mod scheduler;
pub mod task;

pub use bus::MessageBus;
pub use member::{MemberId, MemberStatus, TeamMember};
pub use message::{Recipient, TeamMessage, TeamMessageKind};
pub use scheduler::{TeamChannels, TeamConfig, TeamScheduler, LEAD_ONLY_TOOLS};
pub use task::{TaskBoard, TaskId, TaskStatus, TeamTask};
