//! # ensemble-agent
//!
//! Multi-agent orchestration for Ensemble.
//!
//! ## Features
//! - Agent loop engine: compress, drain, call, stream, dispatch, close
//! - Two-tier context compression with orphan sanitization
//! - Tool approval flow with session-remembered grants
//! - Sub-agent delegation behind a cancellable concurrency limiter
//! - Team scheduler with a dependency-aware task board

pub mod approval;
pub mod compressor;
pub mod config;
pub mod engine;
pub mod events;
pub mod inbox;
pub mod partial_json;
pub mod registry;
pub mod subagent;
pub mod team;
pub mod tool_state;

// Engine
pub use config::{LoopConfig, DEFAULT_MAX_ITERATIONS};
pub use engine::{AgentLoop, LoopOutcome};
pub use events::{AgentEvent, CompressionTier, IterationStop, LoopEndReason};

// Tooling seams
pub use approval::{ApprovalBroker, ApprovalHandler, ApprovalRequest, ApproveAll, DenyAll};
pub use registry::{filter_definitions, ToolRegistry};
pub use tool_state::{ToolCallState, ToolCallStatus};

// Compression
pub use compressor::{
    estimate_history_tokens, sanitize_orphans, Compressor, CompressorConfig, Summarizer,
    PLACEHOLDER_THINKING, PLACEHOLDER_TOOL_RESULT,
};

// Messaging
pub use inbox::{Inbox, InboundMessage, TEAM_MESSAGE_PREFIX};

// Delegation
pub use subagent::{ProfileRegistry, SubAgentProfile, SubAgentResult, SubAgentRunner};

// Team
pub use team::{
    MemberId, MemberStatus, MessageBus, TaskId, TaskStatus, TeamChannels, TeamConfig,
    TeamMember, TeamMessage, TeamScheduler, TeamTask,
};
