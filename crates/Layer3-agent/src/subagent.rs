//! Sub-agent delegation
//!
//! A sub-agent is a bounded, synchronous delegate: it runs its own
//! agent loop over a fresh history restricted to a profile's tool
//! whitelist, gated by the shared concurrency limiter, and hands back
//! a structured result. A sub-agent failure is captured in the result;
//! it never crashes the parent loop.

use crate::approval::ApprovalHandler;
use crate::compressor::Summarizer;
use crate::config::LoopConfig;
use crate::engine::AgentLoop;
use crate::events::{AgentEvent, LoopEndReason};
use crate::registry::ToolRegistry;
use ensemble_foundation::{ConcurrencyLimiter, Error, Result, TokenUsage};
use ensemble_provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A named sub-agent configuration
#[derive(Debug, Clone)]
pub struct SubAgentProfile {
    pub name: String,
    pub description: String,

    /// Tools the sub-agent may see and call
    pub allowed_tools: Vec<String>,

    pub system_prompt: String,

    /// Iteration ceiling for one delegation
    pub max_iterations: i32,
}

impl SubAgentProfile {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            allowed_tools: Vec::new(),
            system_prompt: String::new(),
            max_iterations: 15,
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: i32) -> Self {
        self.max_iterations = max;
        self
    }
}

/// Registry of sub-agent profiles, looked up by name at delegation time
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, SubAgentProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the stock profiles
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            SubAgentProfile::new("explore", "Read-only codebase exploration")
                .with_allowed_tools(vec![
                    "read".to_string(),
                    "grep".to_string(),
                    "glob".to_string(),
                ])
                .with_system_prompt(
                    "You are an exploration agent. Investigate the codebase and \
                     report findings. You cannot modify anything.",
                ),
        );
        registry.register(
            SubAgentProfile::new("general", "General-purpose delegate")
                .with_system_prompt("You are a general-purpose agent. Complete the given task."),
        );
        registry
    }

    pub fn register(&mut self, profile: SubAgentProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&SubAgentProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

/// Result of one delegation
#[derive(Debug, Clone)]
pub struct SubAgentResult {
    /// Final text produced by the sub-agent
    pub output: String,

    pub reason: LoopEndReason,
    pub iterations: u32,
    pub tool_calls: u32,
    pub usage: TokenUsage,
}

/// Runs sub-agents against shared provider, tools, and limiter
pub struct SubAgentRunner {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    summarizer: Option<Arc<dyn Summarizer>>,
    registry: ProfileRegistry,
    limiter: ConcurrencyLimiter,
}

impl SubAgentRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolRegistry>,
        approvals: Arc<dyn ApprovalHandler>,
        registry: ProfileRegistry,
        limiter: ConcurrencyLimiter,
    ) -> Self {
        Self {
            provider,
            tools,
            approvals,
            summarizer: None,
            registry,
            limiter,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Delegate a task to the named profile and wait for the result.
    ///
    /// The sub-agent gets a child of `parent_cancel`, so cancelling the
    /// parent tears the delegation down too. Waiting for a limiter slot
    /// counts as part of the delegation and is equally cancellable.
    pub async fn run(
        &self,
        profile_name: &str,
        task: &str,
        parent_cancel: &CancellationToken,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<SubAgentResult> {
        let profile = self
            .registry
            .get(profile_name)
            .ok_or_else(|| Error::SubAgentNotFound(profile_name.to_string()))?
            .clone();

        let cancel = parent_cancel.child_token();

        debug!(profile = %profile.name, "sub-agent waiting for a slot");
        let _permit = self.limiter.acquire(&cancel).await?;
        info!(profile = %profile.name, "sub-agent started");

        let mut config = LoopConfig::default()
            .with_max_iterations(profile.max_iterations)
            .with_system_prompt(profile.system_prompt.clone())
            .with_cancel(cancel);
        if !profile.allowed_tools.is_empty() {
            config = config.with_allowed_tools(profile.allowed_tools.clone());
        }

        let mut agent = AgentLoop::new(
            self.provider.clone(),
            self.tools.clone(),
            self.approvals.clone(),
            config,
            events,
        );
        if let Some(summarizer) = &self.summarizer {
            agent = agent.with_summarizer(summarizer.clone());
        }

        let outcome = agent
            .run(vec![ensemble_provider::Message::user(task)])
            .await;

        if outcome.reason == LoopEndReason::Aborted && parent_cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(
            profile = %profile.name,
            iterations = outcome.iterations,
            ?outcome.reason,
            "sub-agent finished"
        );

        Ok(SubAgentResult {
            output: outcome.final_text,
            reason: outcome.reason,
            iterations: outcome.iterations,
            tool_calls: outcome.tool_calls,
            usage: outcome.usage,
        })
    }
}
