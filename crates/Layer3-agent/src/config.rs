//! Agent loop configuration

use crate::compressor::CompressorConfig;
use crate::inbox::Inbox;
use ensemble_provider::RetryConfig;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default iteration ceiling
pub const DEFAULT_MAX_ITERATIONS: i32 = 20;

/// Configuration for a single agent loop run
#[derive(Clone)]
pub struct LoopConfig {
    /// Iteration ceiling; zero or negative means unbounded
    pub max_iterations: i32,

    /// Tool allow list; `None` exposes the whole registry
    pub allowed_tools: Option<Vec<String>>,

    /// System prompt for the provider request
    pub system_prompt: Option<String>,

    /// Cancellation token checked at every await point
    pub cancel: CancellationToken,

    /// Queue drained into the history at each iteration boundary
    pub inbox: Option<Inbox>,

    /// Context compression; `None` disables it
    pub compression: Option<CompressorConfig>,

    /// Force every tool call through approval, read-only included,
    /// ignoring session-remembered grants
    pub require_approval: bool,

    /// Checked at iteration boundaries; when set the loop finishes the
    /// current iteration and stops (graceful shutdown, external task
    /// completion)
    pub stop_flag: Option<Arc<AtomicBool>>,

    /// Retry policy for provider connection establishment
    pub retry: RetryConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            allowed_tools: None,
            system_prompt: None,
            cancel: CancellationToken::new(),
            inbox: None,
            compression: None,
            require_approval: false,
            stop_flag: None,
            retry: RetryConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: i32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_inbox(mut self, inbox: Inbox) -> Self {
        self.inbox = Some(inbox);
        self
    }

    pub fn with_compression(mut self, config: CompressorConfig) -> Self {
        self.compression = Some(config);
        self
    }

    pub fn with_require_approval(mut self) -> Self {
        self.require_approval = true;
        self
    }

    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether the ceiling applies
    pub fn bounded(&self) -> bool {
        self.max_iterations > 0
    }
}
