//! Agent loop engine
//!
//! Drives the conversation turn by turn: compress, drain the inbox,
//! call the provider, consume the stream, dispatch tools, close the
//! iteration. Every await point races the cancellation token; the loop
//! emits `LoopEnd` exactly once and always returns a structurally
//! valid history.

use crate::approval::ApprovalHandler;
use crate::compressor::{sanitize_orphans, Compressor, Summarizer};
use crate::config::LoopConfig;
use crate::events::{AgentEvent, CompressionTier, IterationStop, LoopEndReason};
use crate::registry::{filter_definitions, ToolRegistry};
use crate::tool_state::{ToolCallState, ToolCallStatus};
use ensemble_foundation::{Error, TokenUsage};
use ensemble_provider::{
    backoff, ContentBlock, Message, Provider, ProviderError, ProviderRequest, ProviderStream,
    RetryClassification, RetryableError, StreamEvent,
};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Final report of an agent loop run
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub reason: LoopEndReason,

    /// History as it stood when the loop ended
    pub history: Vec<Message>,

    pub iterations: u32,
    pub tool_calls: u32,
    pub usage: TokenUsage,

    /// Text of the last assistant message that carried any
    pub final_text: String,
}

/// Everything collected from one provider stream
#[derive(Default)]
struct StreamOutput {
    text: String,
    thinking: String,
    calls: Vec<ToolCallState>,
    usage: TokenUsage,
}

enum StreamFailure {
    Cancelled,
    Failed { error: ProviderError, partial: bool },
}

struct RunState {
    history: Vec<Message>,
    iterations: u32,
    tool_calls: u32,
    usage: TokenUsage,
    final_text: String,
}

/// The agent loop
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: LoopConfig,
    event_tx: mpsc::UnboundedSender<AgentEvent>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolRegistry>,
        approvals: Arc<dyn ApprovalHandler>,
        config: LoopConfig,
        event_tx: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        Self {
            provider,
            tools,
            approvals,
            summarizer: None,
            config,
            event_tx,
        }
    }

    /// Attach the summarizer full compression needs. Without one, full
    /// compression degrades to pre-compression.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    fn tool_allowed(&self, name: &str) -> bool {
        match &self.config.allowed_tools {
            Some(allowed) => allowed.iter().any(|n| n == name),
            None => true,
        }
    }

    fn end(&self, reason: LoopEndReason, state: RunState) -> LoopOutcome {
        info!(?reason, iterations = state.iterations, "agent loop ended");
        self.emit(AgentEvent::LoopEnd {
            reason: reason.clone(),
        });
        LoopOutcome {
            reason,
            history: state.history,
            iterations: state.iterations,
            tool_calls: state.tool_calls,
            usage: state.usage,
            final_text: state.final_text,
        }
    }

    /// Run the loop to completion over the given history.
    pub async fn run(&self, history: Vec<Message>) -> LoopOutcome {
        let cancel = self.config.cancel.clone();
        let read_only: HashSet<String> = self
            .tools
            .definitions()
            .into_iter()
            .filter(|d| d.read_only)
            .map(|d| d.name)
            .collect();
        let mut approved: HashSet<String> = HashSet::new();

        let mut state = RunState {
            history,
            iterations: 0,
            tool_calls: 0,
            usage: TokenUsage::default(),
            final_text: String::new(),
        };

        loop {
            // Iteration boundary checks
            if cancel.is_cancelled() {
                return self.end(LoopEndReason::Aborted, state);
            }
            if let Some(flag) = &self.config.stop_flag {
                if flag.load(Ordering::SeqCst) {
                    debug!("stop flag set, finishing at iteration boundary");
                    return self.end(LoopEndReason::Completed, state);
                }
            }
            if self.config.bounded() && state.iterations >= self.config.max_iterations as u32 {
                return self.end(LoopEndReason::MaxIterations, state);
            }

            state.iterations += 1;
            let iteration = state.iterations;
            self.emit(AgentEvent::IterationStart { iteration });

            // 1. Compression check
            if let Err(reason) = self.maybe_compress(&mut state, &cancel).await {
                return self.end(reason, state);
            }

            // 2. Inbox drain
            if let Some(inbox) = &self.config.inbox {
                for msg in inbox.drain() {
                    state.history.push(Message::user(msg.render()));
                }
            }

            // 3-4. Provider call (with retry) and stream consumption
            let output = match self.call_provider(&state.history, &cancel).await {
                Ok(output) => output,
                Err(ProviderError::Cancelled) => return self.end(LoopEndReason::Aborted, state),
                Err(e) => return self.end(LoopEndReason::Error(e.to_string()), state),
            };

            if output.usage.total() > 0 {
                state.usage.add(&output.usage);
                self.emit(AgentEvent::Usage(output.usage));
            }

            let mut blocks = Vec::new();
            if !output.thinking.is_empty() {
                blocks.push(ContentBlock::thinking(output.thinking));
            }
            if !output.text.is_empty() {
                state.final_text = output.text.clone();
                blocks.push(ContentBlock::text(output.text));
            }
            for call in &output.calls {
                blocks.push(ContentBlock::tool_use(&call.id, &call.name, call.input.clone()));
            }
            if !blocks.is_empty() {
                state.history.push(Message::assistant_blocks(blocks));
            }

            if output.calls.is_empty() {
                self.emit(AgentEvent::IterationEnd {
                    iteration,
                    stop: IterationStop::EndTurn,
                });
                return self.end(LoopEndReason::Completed, state);
            }

            // 5. Tool dispatch, sequential in request order
            let mut results = Vec::with_capacity(output.calls.len());
            let mut aborted = false;

            for mut call in output.calls {
                // Once cancelled, remaining calls get synthesized
                // results so the history stays pair-matched
                if aborted || cancel.is_cancelled() {
                    aborted = true;
                    if !call.status().is_terminal() {
                        call.fail("cancelled");
                    }
                    results.push(ContentBlock::tool_result(&call.id, "cancelled", true));
                    continue;
                }

                // The allow list binds execution, not just what the
                // provider was shown; a call naming anything outside
                // it is refused without touching the registry
                if !self.tool_allowed(&call.name) {
                    let error = format!("tool '{}' is not available in this session", call.name);
                    call.fail(error.clone());
                    self.emit(AgentEvent::ToolCallFailed {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        error: error.clone(),
                    });
                    results.push(ContentBlock::tool_result(
                        &call.id,
                        format!("Error: {}", error),
                        true,
                    ));
                    continue;
                }

                // Malformed arguments detected during streaming
                if call.status() == ToolCallStatus::Error {
                    let error = call
                        .error
                        .clone()
                        .unwrap_or_else(|| "invalid tool call".to_string());
                    self.emit(AgentEvent::ToolCallFailed {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        error: error.clone(),
                    });
                    results.push(ContentBlock::tool_result(
                        &call.id,
                        format!("Error: {}", error),
                        true,
                    ));
                    continue;
                }

                state.tool_calls += 1;

                let needs_approval = self.config.require_approval
                    || (!read_only.contains(&call.name) && !approved.contains(&call.name));

                if needs_approval {
                    call.require_approval();
                    self.emit(AgentEvent::ToolCallPendingApproval {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    });

                    let decision = tokio::select! {
                        decision = self.approvals.request_approval(&call.id, &call.name, &call.input) => decision,
                        _ = cancel.cancelled() => {
                            aborted = true;
                            call.fail("cancelled");
                            results.push(ContentBlock::tool_result(&call.id, "cancelled", true));
                            continue;
                        }
                    };

                    match decision {
                        Ok(true) => {
                            approved.insert(call.name.clone());
                        }
                        Ok(false) => {
                            call.fail("Permission denied");
                            self.emit(AgentEvent::ToolCallFailed {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                error: "Permission denied".to_string(),
                            });
                            results.push(ContentBlock::tool_result(
                                &call.id,
                                "Permission denied",
                                true,
                            ));
                            continue;
                        }
                        Err(e) => {
                            let error = e.to_string();
                            call.fail(error.clone());
                            self.emit(AgentEvent::ToolCallFailed {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                error: error.clone(),
                            });
                            results.push(ContentBlock::tool_result(
                                &call.id,
                                format!("Error: {}", error),
                                true,
                            ));
                            continue;
                        }
                    }
                }

                call.start_running();
                self.emit(AgentEvent::ToolCallRunning {
                    id: call.id.clone(),
                    name: call.name.clone(),
                });

                let started = Instant::now();
                match self.tools.execute(&call.name, call.input.clone(), &cancel).await {
                    Ok(output) => {
                        call.complete(output.clone());
                        self.emit(AgentEvent::ToolCallCompleted {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            output: output.clone(),
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                        results.push(ContentBlock::tool_result(&call.id, output, false));
                    }
                    Err(Error::Cancelled) => {
                        aborted = true;
                        call.fail("cancelled");
                        results.push(ContentBlock::tool_result(&call.id, "cancelled", true));
                    }
                    Err(e) => {
                        let error = e.to_string();
                        call.fail(error.clone());
                        self.emit(AgentEvent::ToolCallFailed {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            error: error.clone(),
                        });
                        results.push(ContentBlock::tool_result(
                            &call.id,
                            format!("Error: {}", error),
                            true,
                        ));
                    }
                }
            }

            // 6. Iteration close: one tool message carrying every result
            state.history.push(Message::tool_results(results));

            if aborted {
                return self.end(LoopEndReason::Aborted, state);
            }

            self.emit(AgentEvent::IterationEnd {
                iteration,
                stop: IterationStop::ToolUse,
            });
        }
    }

    /// Apply the compression tier the history calls for, if any.
    async fn maybe_compress(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), LoopEndReason> {
        let Some(config) = &self.config.compression else {
            return Ok(());
        };
        let Some(tier) = config.evaluate(&state.history) else {
            return Ok(());
        };

        let before = state.history.len();
        self.emit(AgentEvent::CompressionStart {
            tier,
            messages_before: before,
        });

        let compressor = Compressor::new(config.clone());

        let compressed = match (tier, &self.summarizer) {
            (CompressionTier::Full, Some(summarizer)) => {
                let result = tokio::select! {
                    result = compressor.compress_full(&state.history, summarizer.as_ref()) => result,
                    _ = cancel.cancelled() => return Err(LoopEndReason::Aborted),
                };
                match result {
                    Ok(history) => history,
                    Err(e) => {
                        warn!("full compression failed, falling back to pre-compression: {}", e);
                        sanitize_orphans(&compressor.precompress(&state.history))
                    }
                }
            }
            _ => sanitize_orphans(&compressor.precompress(&state.history)),
        };

        state.history = compressed;
        self.emit(AgentEvent::Compressed {
            tier,
            messages_before: before,
            messages_after: state.history.len(),
        });
        Ok(())
    }

    /// Open a provider stream with the retry policy and consume it.
    ///
    /// Connection failures follow the classified backoff schedule. A
    /// stream that dies after partial output retries on a fixed delay,
    /// discarding the partial output, against the same attempt budget.
    async fn call_provider(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<StreamOutput, ProviderError> {
        let tools = filter_definitions(
            self.tools.definitions(),
            self.config.allowed_tools.as_deref(),
        );
        let request = ProviderRequest {
            messages: history.to_vec(),
            tools,
            system_prompt: self.config.system_prompt.clone(),
        };

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let (error, classification) = match self.provider.open_stream(request.clone()).await {
                Ok(stream) => match self.consume_stream(stream, cancel).await {
                    Ok(output) => return Ok(output),
                    Err(StreamFailure::Cancelled) => return Err(ProviderError::Cancelled),
                    Err(StreamFailure::Failed { error, partial }) => {
                        let classification = if partial {
                            RetryClassification::RetryAfterPartialStream
                        } else {
                            error.classify()
                        };
                        (error, classification)
                    }
                },
                Err(error) => {
                    let classification = error.classify();
                    (error, classification)
                }
            };

            let delay = match self.config.retry.delay_for(classification, attempt) {
                Some(delay) => delay,
                None => {
                    debug!("provider call not retryable: {}", error);
                    return Err(error);
                }
            };
            if attempt >= self.config.retry.max_retries {
                warn!(
                    "provider call exhausted {} retries: {}",
                    self.config.retry.max_retries, error
                );
                return Err(error);
            }

            warn!(
                "provider call attempt {} failed, retrying in {:?}: {}",
                attempt + 1,
                delay,
                error
            );
            backoff(delay, cancel).await?;
            attempt += 1;
        }
    }

    async fn consume_stream(
        &self,
        mut stream: ProviderStream,
        cancel: &CancellationToken,
    ) -> Result<StreamOutput, StreamFailure> {
        let mut output = StreamOutput::default();
        let mut indices: Vec<usize> = Vec::new();
        let mut partial = false;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(StreamFailure::Cancelled),
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                StreamEvent::TextDelta(text) => {
                    partial = true;
                    output.text.push_str(&text);
                    self.emit(AgentEvent::TextDelta { text });
                }
                StreamEvent::ThinkingDelta(text) => {
                    partial = true;
                    output.thinking.push_str(&text);
                    self.emit(AgentEvent::ThinkingDelta { text });
                }
                StreamEvent::ToolUseStart { index, id, name } => {
                    partial = true;
                    self.emit(AgentEvent::ToolCallStreaming {
                        id: id.clone(),
                        name: name.clone(),
                        partial_input: None,
                    });
                    output.calls.push(ToolCallState::new(id, name));
                    indices.push(index);
                }
                StreamEvent::ToolInputDelta {
                    index,
                    arguments_delta,
                } => {
                    // Providers may reuse a stream index once the
                    // previous call at that index ended; deltas bind
                    // to the newest call carrying it
                    if let Some(pos) = indices.iter().rposition(|i| *i == index) {
                        let call = &mut output.calls[pos];
                        call.append_input_delta(&arguments_delta);
                        self.emit(AgentEvent::ToolCallStreaming {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            partial_input: call.preview(),
                        });
                    }
                }
                StreamEvent::ToolUseEnd { index } => {
                    if let Some(pos) = indices.iter().rposition(|i| *i == index) {
                        let call = &mut output.calls[pos];
                        if call.status() == ToolCallStatus::Streaming {
                            call.finalize_input();
                        }
                    }
                }
                StreamEvent::Usage(usage) => output.usage.add(&usage),
                StreamEvent::Done => break,
                StreamEvent::Error(error) => {
                    return Err(StreamFailure::Failed { error, partial })
                }
            }
        }

        // Streams may end without an explicit ToolUseEnd per call
        for call in &mut output.calls {
            if call.status() == ToolCallStatus::Streaming {
                call.finalize_input();
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApproveAll, DenyAll};
    use async_trait::async_trait;
    use ensemble_provider::ToolDef;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    /// Provider that replays scripted streams, then answers "done"
    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Result<Vec<StreamEvent>, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Result<Vec<StreamEvent>, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn open_stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderStream, ProviderError> {
            let script = self.scripts.lock().pop_front().unwrap_or_else(|| {
                Ok(vec![
                    StreamEvent::TextDelta("done".to_string()),
                    StreamEvent::Done,
                ])
            });
            script.map(|events| {
                Box::pin(futures::stream::iter(events)) as ProviderStream
            })
        }
    }

    /// Provider whose stream never produces anything
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        async fn open_stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderStream, ProviderError> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    struct EchoRegistry {
        executions: AtomicU32,
    }

    impl EchoRegistry {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                executions: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolRegistry for EchoRegistry {
        fn definitions(&self) -> Vec<ToolDef> {
            vec![
                ToolDef::new("read", "Read a file").read_only(),
                ToolDef::new("write", "Write a file"),
            ]
        }

        async fn execute(
            &self,
            name: &str,
            _input: Value,
            _cancel: &CancellationToken,
        ) -> ensemble_foundation::Result<String> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran {}", name))
        }
    }

    fn tool_call_script(id: &str, name: &str, args: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolUseStart {
                index: 0,
                id: id.to_string(),
                name: name.to_string(),
            },
            StreamEvent::ToolInputDelta {
                index: 0,
                arguments_delta: args.to_string(),
            },
            StreamEvent::ToolUseEnd { index: 0 },
            StreamEvent::Usage(TokenUsage::new(10, 5)),
            StreamEvent::Done,
        ]
    }

    fn spawn_loop(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolRegistry>,
        approvals: Arc<dyn ApprovalHandler>,
        config: LoopConfig,
    ) -> (AgentLoop, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AgentLoop::new(provider, tools, approvals, config, tx), rx)
    }

    fn fast_retry() -> ensemble_provider::RetryConfig {
        ensemble_provider::RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_completes_on_text_only_response() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            StreamEvent::TextDelta("hello".to_string()),
            StreamEvent::Done,
        ])]);
        let (agent, mut rx) = spawn_loop(
            provider,
            EchoRegistry::new(),
            Arc::new(ApproveAll),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.final_text, "hello");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.history.len(), 2);

        let mut loop_ends = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AgentEvent::LoopEnd { .. }) {
                loop_ends += 1;
            }
        }
        assert_eq!(loop_ends, 1);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let provider = ScriptedProvider::new(vec![Ok(tool_call_script(
            "tc_1",
            "read",
            r#"{"path": "a.txt"}"#,
        ))]);
        let tools = EchoRegistry::new();
        let (agent, _rx) = spawn_loop(
            provider,
            tools.clone(),
            Arc::new(ApproveAll),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("read a.txt")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(tools.executions.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.usage.total(), 15);

        // user, assistant(tool_use), tool(result), assistant(done)
        assert_eq!(outcome.history.len(), 4);
        assert_eq!(outcome.history[2].tool_result_ids(), vec!["tc_1"]);
    }

    #[tokio::test]
    async fn test_denied_tool_synthesizes_permission_denied() {
        let provider = ScriptedProvider::new(vec![Ok(tool_call_script(
            "tc_1",
            "write",
            r#"{"path": "a.txt"}"#,
        ))]);
        let tools = EchoRegistry::new();
        let (agent, _rx) = spawn_loop(
            provider,
            tools.clone(),
            Arc::new(DenyAll),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("write a.txt")]).await;

        // Denied but the loop keeps going and finishes on the next turn
        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(tools.executions.load(Ordering::SeqCst), 0);

        match &outcome.history[2].blocks[0] {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                assert_eq!(content, "Permission denied");
                assert!(is_error);
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_approval_remembered_per_tool_name() {
        struct CountingApprover(AtomicU32);

        #[async_trait]
        impl ApprovalHandler for CountingApprover {
            async fn request_approval(
                &self,
                _call_id: &str,
                _tool_name: &str,
                _input: &Value,
            ) -> ensemble_foundation::Result<bool> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        }

        let provider = ScriptedProvider::new(vec![
            Ok(tool_call_script("tc_1", "write", "{}")),
            Ok(tool_call_script("tc_2", "write", "{}")),
        ]);
        let approver = Arc::new(CountingApprover(AtomicU32::new(0)));
        let (agent, _rx) = spawn_loop(
            provider,
            EchoRegistry::new(),
            approver.clone(),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("write twice")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.tool_calls, 2);
        // Second call rides the session grant
        assert_eq!(approver.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_only_tools_skip_approval() {
        let provider = ScriptedProvider::new(vec![Ok(tool_call_script(
            "tc_1",
            "read",
            r#"{"path": "a.txt"}"#,
        ))]);
        let (agent, _rx) = spawn_loop(
            provider,
            EchoRegistry::new(),
            Arc::new(DenyAll),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("read")]).await;

        // DenyAll never consulted for a read-only tool
        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.tool_calls, 1);
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call_script("tc_1", "read", "{}")),
            Ok(tool_call_script("tc_2", "read", "{}")),
            Ok(tool_call_script("tc_3", "read", "{}")),
        ]);
        let config = LoopConfig::default().with_max_iterations(2);
        let (agent, _rx) = spawn_loop(provider, EchoRegistry::new(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("loop forever")]).await;

        assert_eq!(outcome.reason, LoopEndReason::MaxIterations);
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn test_cancellation_mid_stream() {
        let cancel = CancellationToken::new();
        let config = LoopConfig::default().with_cancel(cancel.clone());
        let (agent, _rx) = spawn_loop(
            Arc::new(HangingProvider),
            EchoRegistry::new(),
            Arc::new(ApproveAll),
            config,
        );

        let handle = tokio::spawn(async move { agent.run(vec![Message::user("hi")]).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, LoopEndReason::Aborted);
    }

    #[tokio::test]
    async fn test_connection_failure_retried_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::ServerError("boom".to_string())),
            Err(ProviderError::Network("flaky".to_string())),
            Ok(vec![
                StreamEvent::TextDelta("recovered".to_string()),
                StreamEvent::Done,
            ]),
        ]);
        let config = LoopConfig::default().with_retry(fast_retry());
        let (agent, _rx) = spawn_loop(provider, EchoRegistry::new(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.final_text, "recovered");
    }

    #[tokio::test]
    async fn test_auth_failure_is_terminal() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Authentication("bad key".to_string())),
            Ok(vec![StreamEvent::Done]),
        ]);
        let config = LoopConfig::default().with_retry(fast_retry());
        let provider_handle = provider.clone();
        let (agent, _rx) = spawn_loop(provider, EchoRegistry::new(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert!(matches!(outcome.reason, LoopEndReason::Error(_)));
        // The second script was never consumed
        assert_eq!(provider_handle.scripts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_stream_failure_reconnects_and_discards_partial() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![
                StreamEvent::TextDelta("par".to_string()),
                StreamEvent::Error(ProviderError::StreamError("connection reset".to_string())),
            ]),
            Ok(vec![
                StreamEvent::TextDelta("clean answer".to_string()),
                StreamEvent::Done,
            ]),
        ]);
        let config = LoopConfig::default().with_retry(fast_retry());
        let (agent, _rx) = spawn_loop(provider, EchoRegistry::new(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.final_text, "clean answer");
        // The aborted partial never reached the history
        assert_eq!(outcome.history[1].text(), "clean answer");
    }

    #[tokio::test]
    async fn test_inbox_drained_at_iteration_boundary() {
        use crate::inbox::{Inbox, InboundMessage};

        let inbox = Inbox::new();
        inbox.push(InboundMessage::new("lead", "status update please"));

        let provider = ScriptedProvider::new(vec![]);
        let config = LoopConfig::default().with_inbox(inbox);
        let (agent, _rx) = spawn_loop(provider, EchoRegistry::new(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("work on the task")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        let injected = &outcome.history[1];
        assert!(injected.text().starts_with("[team]"));
        assert!(injected.text().contains("status update please"));
    }

    #[tokio::test]
    async fn test_malformed_tool_arguments_fail_without_execution() {
        let provider = ScriptedProvider::new(vec![Ok(tool_call_script(
            "tc_1",
            "read",
            "{not valid json",
        ))]);
        let tools = EchoRegistry::new();
        let (agent, _rx) = spawn_loop(
            provider,
            tools.clone(),
            Arc::new(ApproveAll),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(tools.executions.load(Ordering::SeqCst), 0);
        match &outcome.history[2].blocks[0] {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                assert!(is_error);
                assert!(content.contains("invalid tool arguments"));
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_excluded_tool_refused_at_dispatch() {
        // The provider is free to name any tool; only whitelisted
        // ones may actually execute
        let provider = ScriptedProvider::new(vec![Ok(tool_call_script(
            "tc_1",
            "write",
            r#"{"path": "a.txt"}"#,
        ))]);
        let tools = EchoRegistry::new();
        let config = LoopConfig::default().with_allowed_tools(vec!["read".to_string()]);
        let (agent, _rx) = spawn_loop(provider, tools.clone(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(tools.executions.load(Ordering::SeqCst), 0);
        match &outcome.history[2].blocks[0] {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                assert!(is_error);
                assert!(content.contains("not available"));
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reused_stream_index_binds_to_newest_call() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            StreamEvent::ToolUseStart {
                index: 0,
                id: "tc_1".to_string(),
                name: "read".to_string(),
            },
            StreamEvent::ToolInputDelta {
                index: 0,
                arguments_delta: r#"{"path": "first.txt"}"#.to_string(),
            },
            StreamEvent::ToolUseEnd { index: 0 },
            StreamEvent::ToolUseStart {
                index: 0,
                id: "tc_2".to_string(),
                name: "read".to_string(),
            },
            StreamEvent::ToolInputDelta {
                index: 0,
                arguments_delta: r#"{"path": "second.txt"}"#.to_string(),
            },
            StreamEvent::ToolUseEnd { index: 0 },
            StreamEvent::Done,
        ])]);
        let (agent, _rx) = spawn_loop(
            provider,
            EchoRegistry::new(),
            Arc::new(ApproveAll),
            LoopConfig::default(),
        );

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.tool_calls, 2);

        let assistant = &outcome.history[1];
        let inputs: Vec<_> = assistant
            .blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, input, .. } => Some((id.as_str(), input.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0], ("tc_1", serde_json::json!({"path": "first.txt"})));
        assert_eq!(inputs[1], ("tc_2", serde_json::json!({"path": "second.txt"})));
    }

    #[tokio::test]
    async fn test_stop_flag_finishes_at_boundary() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let provider = ScriptedProvider::new(vec![]);
        let config = LoopConfig::default().with_stop_flag(flag);
        let (agent, _rx) = spawn_loop(provider, EchoRegistry::new(), Arc::new(ApproveAll), config);

        let outcome = agent.run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.reason, LoopEndReason::Completed);
        assert_eq!(outcome.iterations, 0);
    }
}
