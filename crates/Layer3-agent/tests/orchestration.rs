//! End-to-end orchestration tests against the public API

use async_trait::async_trait;
use ensemble_agent::{
    AgentLoop, ApprovalBroker, ApprovalHandler, ApproveAll, LoopConfig, LoopEndReason,
    ProfileRegistry, SubAgentProfile, SubAgentRunner, TeamConfig, TeamScheduler, ToolRegistry,
};
use ensemble_foundation::ConcurrencyLimiter;
use ensemble_provider::{
    Message, Provider, ProviderError, ProviderRequest, ProviderStream, StreamEvent, ToolDef,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Replays scripted streams in order, then answers with plain text
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Vec<StreamEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn open_stream(&self, _request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let events = self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![
                StreamEvent::TextDelta("all done".to_string()),
                StreamEvent::Done,
            ]
        });
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

struct WorkshopRegistry {
    executions: AtomicU32,
}

impl WorkshopRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ToolRegistry for WorkshopRegistry {
    fn definitions(&self) -> Vec<ToolDef> {
        vec![
            ToolDef::new("read", "Read a file")
                .read_only()
                .with_string_param("path", "File path", true),
            ToolDef::new("write", "Write a file").with_string_param("path", "File path", true),
        ]
    }

    async fn execute(
        &self,
        name: &str,
        input: Value,
        _cancel: &CancellationToken,
    ) -> ensemble_foundation::Result<String> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} ok: {}", name, input))
    }
}

fn tool_call(id: &str, name: &str, args: &str) -> Vec<StreamEvent> {
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
        StreamEvent::Done,
    ]
}

#[tokio::test]
async fn broker_approval_flow_runs_a_mutating_tool() {
    let provider = ScriptedProvider::new(vec![tool_call(
        "tc_1",
        "write",
        r#"{"path": "notes.md"}"#,
    )]);
    let tools = WorkshopRegistry::new();
    let (broker, mut requests) = ApprovalBroker::new();

    // Resolver: approve the write when asked
    let resolver_broker = broker.clone();
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            resolver_broker.resolve(&request.call_id, request.tool_name == "write");
        }
    });

    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let agent = AgentLoop::new(
        provider,
        tools.clone(),
        broker as Arc<dyn ApprovalHandler>,
        LoopConfig::default(),
        events_tx,
    );

    let outcome = agent.run(vec![Message::user("write the notes")]).await;

    assert_eq!(outcome.reason, LoopEndReason::Completed);
    assert_eq!(tools.executions.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.final_text, "all done");
}

#[tokio::test]
async fn subagents_queue_on_the_shared_limiter() {
    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        async fn open_stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderStream, ProviderError> {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok(Box::pin(futures::stream::iter(vec![
                StreamEvent::TextDelta("explored".to_string()),
                StreamEvent::Done,
            ])))
        }
    }

    let mut registry = ProfileRegistry::new();
    registry.register(
        SubAgentProfile::new("scout", "Scout")
            .with_allowed_tools(vec!["read".to_string()])
            .with_system_prompt("Scout the area."),
    );

    let limiter = ConcurrencyLimiter::new(1);
    let runner = Arc::new(SubAgentRunner::new(
        Arc::new(SlowProvider),
        WorkshopRegistry::new(),
        Arc::new(ApproveAll),
        registry,
        limiter.clone(),
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    for _ in 0..2 {
        let runner = runner.clone();
        let cancel = cancel.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        handles.push(tokio::spawn(async move {
            runner.run("scout", "look around", &cancel, tx).await
        }));
    }

    // One runs, one queues
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(limiter.active_count(), 1);
    assert_eq!(limiter.waiting_count(), 1);

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.output, "explored");
    }
    assert_eq!(limiter.active_count(), 0);
}

#[tokio::test]
async fn lead_resumes_with_coalesced_completion_reports() {
    struct DoneProvider;

    #[async_trait]
    impl Provider for DoneProvider {
        async fn open_stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderStream, ProviderError> {
            Ok(Box::pin(futures::stream::iter(vec![
                StreamEvent::TextDelta("finished my part".to_string()),
                StreamEvent::Done,
            ])))
        }
    }

    let provider: Arc<dyn Provider> = Arc::new(DoneProvider);
    let tools = WorkshopRegistry::new();
    let config = TeamConfig::new("builders")
        .with_completion_debounce(Duration::from_millis(40))
        .with_max_concurrent(2);

    let (scheduler, mut channels) =
        TeamScheduler::new(provider.clone(), tools.clone(), Arc::new(ApproveAll), config);

    let a = scheduler.create_task("survey", "survey the site", vec![]);
    let b = scheduler.create_task("plan", "draft the plan", vec![]);
    scheduler.create_task("build", "build it", vec![a, b]);
    scheduler.dispatch_ready();

    // Wait for the scheduler to wake the lead
    let wakeup = tokio::time::timeout(Duration::from_secs(3), channels.lead_wakeups.recv()).await;
    assert!(wakeup.is_ok());

    // The lead takes its next turn with the team inbox wired in; the
    // coalesced report is injected at the iteration boundary
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let lead_config = LoopConfig::default().with_inbox(scheduler.lead_inbox());
    let lead = AgentLoop::new(provider, tools, Arc::new(ApproveAll), lead_config, events_tx);

    let outcome = lead.run(vec![Message::user("coordinate the team")]).await;

    assert_eq!(outcome.reason, LoopEndReason::Completed);
    let injected = outcome
        .history
        .iter()
        .find(|m| m.text().starts_with("[team]"))
        .expect("coalesced completion report injected into lead history");
    assert!(injected.text().contains("completed by"));

    scheduler.join().await;
}
