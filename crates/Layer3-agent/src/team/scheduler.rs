//! Team scheduler
//!
//! Owns the task board, spawns a member loop per claimed task under a
//! per-team concurrency limiter, and keeps the pipeline self-driving:
//! whenever a member finishes, its completion is debounced into the
//! lead's inbox and the next claimable tasks are dispatched without
//! the lead doing anything.

use super::bus::MessageBus;
use super::member::{MemberId, MemberStatus, TeamMember};
use super::message::{Recipient, TeamMessage, TeamMessageKind};
use super::task::{TaskBoard, TaskId, TeamTask};
use crate::approval::ApprovalHandler;
use crate::compressor::CompressorConfig;
use crate::config::{LoopConfig, DEFAULT_MAX_ITERATIONS};
use crate::engine::AgentLoop;
use crate::events::{AgentEvent, LoopEndReason};
use crate::inbox::{InboundMessage, Inbox};
use crate::registry::ToolRegistry;
use ensemble_foundation::{ConcurrencyLimiter, Result, DEFAULT_MAX_CONCURRENT};
use ensemble_provider::{Message, Provider};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tools reserved for the lead; members never see them
pub const LEAD_ONLY_TOOLS: &[&str] = &["create_team", "delete_team", "create_task"];

/// Team tuning
#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub name: String,

    /// Members running provider loops at once
    pub max_concurrent: usize,

    /// Window for coalescing member completions into one lead delivery
    pub completion_debounce: Duration,

    /// Ceiling on automatic lead wake-ups per team lifetime
    pub max_auto_triggers: u32,

    /// Iteration ceiling for each member loop
    pub member_max_iterations: i32,

    /// Context compression for member loops
    pub compression: Option<CompressorConfig>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            name: "team".to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            completion_debounce: Duration::from_millis(800),
            max_auto_triggers: 25,
            member_max_iterations: DEFAULT_MAX_ITERATIONS,
            compression: None,
        }
    }
}

impl TeamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_completion_debounce(mut self, debounce: Duration) -> Self {
        self.completion_debounce = debounce;
        self
    }

    pub fn with_max_auto_triggers(mut self, max: u32) -> Self {
        self.max_auto_triggers = max;
        self
    }

    pub fn with_member_max_iterations(mut self, max: i32) -> Self {
        self.member_max_iterations = max;
        self
    }

    pub fn with_compression(mut self, compression: CompressorConfig) -> Self {
        self.compression = Some(compression);
        self
    }
}

/// One member completion waiting to be told to the lead
struct CompletionNotice {
    member: String,
    task: TaskId,
    subject: String,
    report: String,
}

struct MemberRecord {
    info: TeamMember,
    cancel: CancellationToken,

    /// Makes the member loop stop at its next iteration boundary
    stop_flag: Arc<AtomicBool>,

    /// Set by graceful shutdown; tells the finish path to release the
    /// task instead of marking it completed
    wind_down: Arc<AtomicBool>,
}

struct TeamState {
    board: TaskBoard,
    members: HashMap<MemberId, MemberRecord>,
    handles: Vec<JoinHandle<()>>,
}

/// Receivers handed to whoever drives the lead
pub struct TeamChannels {
    /// Fires when coalesced completions landed in the lead inbox and
    /// the lead should take another turn
    pub lead_wakeups: mpsc::UnboundedReceiver<()>,

    /// Events from every member loop, interleaved
    pub member_events: mpsc::UnboundedReceiver<AgentEvent>,
}

struct TeamInner {
    config: TeamConfig,
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    limiter: ConcurrencyLimiter,
    bus: Arc<MessageBus>,
    state: Mutex<TeamState>,
    cancel: CancellationToken,
    lead_id: MemberId,
    lead_inbox: Inbox,
    completion_tx: mpsc::UnboundedSender<CompletionNotice>,
    wake_tx: mpsc::UnboundedSender<()>,
    events: mpsc::UnboundedSender<AgentEvent>,
    auto_triggers: AtomicU32,
}

/// Dependency-aware dispatcher for one team
#[derive(Clone)]
pub struct TeamScheduler {
    inner: Arc<TeamInner>,
}

impl TeamScheduler {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolRegistry>,
        approvals: Arc<dyn ApprovalHandler>,
        config: TeamConfig,
    ) -> (Self, TeamChannels) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let lead_id = MemberId::new();
        let lead_inbox = Inbox::new();
        let bus = Arc::new(MessageBus::new());
        bus.register(lead_id, lead_inbox.clone());

        let inner = Arc::new(TeamInner {
            limiter: ConcurrencyLimiter::new(config.max_concurrent),
            config,
            provider,
            tools,
            approvals,
            bus,
            state: Mutex::new(TeamState {
                board: TaskBoard::new(),
                members: HashMap::new(),
                handles: Vec::new(),
            }),
            cancel: CancellationToken::new(),
            lead_id,
            lead_inbox,
            completion_tx,
            wake_tx,
            events: events_tx,
            auto_triggers: AtomicU32::new(0),
        });

        tokio::spawn(completion_notifier(inner.clone(), completion_rx));

        (
            Self { inner },
            TeamChannels {
                lead_wakeups: wake_rx,
                member_events: events_rx,
            },
        )
    }

    pub fn lead_id(&self) -> MemberId {
        self.inner.lead_id
    }

    pub fn lead_inbox(&self) -> Inbox {
        self.inner.lead_inbox.clone()
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.inner.bus.clone()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    /// Add a task to the board. Does not dispatch; call
    /// `dispatch_ready` once the graph is built.
    pub fn create_task(
        &self,
        subject: impl Into<String>,
        description: impl Into<String>,
        blocked_by: Vec<TaskId>,
    ) -> TaskId {
        let id = self
            .inner
            .state
            .lock()
            .board
            .add(subject, description, blocked_by);
        debug!(team = %self.inner.config.name, task = %id, "task created");
        id
    }

    pub fn task_snapshot(&self) -> Vec<TeamTask> {
        self.inner.state.lock().board.snapshot()
    }

    pub fn member_snapshot(&self) -> Vec<TeamMember> {
        self.inner
            .state
            .lock()
            .members
            .values()
            .map(|r| r.info.clone())
            .collect()
    }

    /// Spawn a member for every currently claimable task.
    pub fn dispatch_ready(&self) {
        TeamInner::dispatch(&self.inner);
    }

    /// Route a message through the team bus. A `ShutdownRequest` also
    /// arms the recipient's wind-down, so the member stops at its next
    /// iteration boundary rather than treating the request as chat.
    pub fn send_message(&self, message: &TeamMessage) -> Result<()> {
        if message.kind == TeamMessageKind::ShutdownRequest {
            match message.to {
                Recipient::Member(id) => self.shutdown_member(id, true),
                Recipient::All => self.shutdown(true),
            }
        }
        self.inner.bus.deliver(message)
    }

    /// Mark a task completed from outside the member loop. The owning
    /// member, if any, stops at its next iteration boundary.
    pub fn complete_task(&self, id: TaskId, report: impl Into<String>) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            state.board.complete(id, report)?;
            let owner = state.board.get(id).and_then(|t| t.owner);
            if let Some(owner) = owner {
                if let Some(record) = state.members.get(&owner) {
                    record.stop_flag.store(true, Ordering::SeqCst);
                }
            }
        }
        TeamInner::dispatch(&self.inner);
        Ok(())
    }

    /// Stop one member. Graceful lets the current iteration finish;
    /// immediate cancels its token.
    pub fn shutdown_member(&self, id: MemberId, graceful: bool) {
        let state = self.inner.state.lock();
        if let Some(record) = state.members.get(&id) {
            if graceful {
                record.wind_down.store(true, Ordering::SeqCst);
                record.stop_flag.store(true, Ordering::SeqCst);
            } else {
                record.cancel.cancel();
            }
        }
    }

    /// Stop the whole team.
    pub fn shutdown(&self, graceful: bool) {
        info!(team = %self.inner.config.name, graceful, "team shutdown requested");
        if graceful {
            let state = self.inner.state.lock();
            for record in state.members.values() {
                record.wind_down.store(true, Ordering::SeqCst);
                record.stop_flag.store(true, Ordering::SeqCst);
            }
        } else {
            self.inner.cancel.cancel();
        }
    }

    /// No claimable work and no member waiting or working.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.board.has_claimable()
            && state.members.values().all(|r| {
                matches!(r.info.status, MemberStatus::Stopped | MemberStatus::Idle)
            })
    }

    /// Wait for every spawned member to finish.
    pub async fn join(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut self.inner.state.lock().handles);
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

impl TeamInner {
    /// Claim and spawn until nothing is claimable. Claims happen under
    /// the state lock; spawning happens outside it.
    fn dispatch(inner: &Arc<TeamInner>) {
        loop {
            if inner.cancel.is_cancelled() {
                return;
            }

            let claimed = {
                let mut state = inner.state.lock();
                let Some(task_id) = state.board.find_next_claimable() else {
                    break;
                };

                let mut info = TeamMember::new(format!("worker-{}", task_id.0));
                let member_id = info.id;
                if state.board.claim(task_id, member_id).is_err() {
                    break;
                }
                info.status = MemberStatus::Waiting;
                info.current_task = Some(task_id);

                let cancel = inner.cancel.child_token();
                let stop_flag = Arc::new(AtomicBool::new(false));
                let wind_down = Arc::new(AtomicBool::new(false));
                state.members.insert(
                    member_id,
                    MemberRecord {
                        info,
                        cancel: cancel.clone(),
                        stop_flag: stop_flag.clone(),
                        wind_down: wind_down.clone(),
                    },
                );

                state.board.get(task_id).cloned().map(|task| {
                    (task, member_id, cancel, stop_flag, wind_down)
                })
            };

            let Some((task, member_id, cancel, stop_flag, wind_down)) = claimed else {
                break;
            };

            let inbox = Inbox::new();
            inner.bus.register(member_id, inbox.clone());
            info!(
                team = %inner.config.name,
                task = %task.id,
                member = %member_id,
                "task claimed, member spawned"
            );

            let handle = tokio::spawn(run_member(
                inner.clone(),
                task,
                member_id,
                cancel,
                stop_flag,
                wind_down,
                inbox,
            ));
            inner.state.lock().handles.push(handle);
        }
    }

    fn set_member_status(&self, id: MemberId, status: MemberStatus) {
        if let Some(record) = self.state.lock().members.get_mut(&id) {
            record.info.status = status;
        }
    }
}

/// One member's whole lifetime: wait for a slot, run the loop, settle
/// the task, notify, auto-dispatch.
async fn run_member(
    inner: Arc<TeamInner>,
    task: TeamTask,
    member_id: MemberId,
    cancel: CancellationToken,
    stop_flag: Arc<AtomicBool>,
    wind_down: Arc<AtomicBool>,
    inbox: Inbox,
) {
    let permit = match inner.limiter.acquire(&cancel).await {
        Ok(permit) => permit,
        Err(_) => {
            // Cancelled while queued; hand the task back
            let mut state = inner.state.lock();
            if let Some(record) = state.members.get_mut(&member_id) {
                record.info.status = MemberStatus::Stopped;
            }
            let _ = state.board.release(task.id);
            drop(state);
            inner.bus.unregister(member_id);
            return;
        }
    };

    inner.set_member_status(member_id, MemberStatus::Working);

    let allowed: Vec<String> = inner
        .tools
        .definitions()
        .into_iter()
        .map(|d| d.name)
        .filter(|name| !LEAD_ONLY_TOOLS.contains(&name.as_str()))
        .collect();

    let mut config = LoopConfig::default()
        .with_max_iterations(inner.config.member_max_iterations)
        .with_allowed_tools(allowed)
        .with_system_prompt(format!(
            "You are member {} of team '{}'. Work the task you were \
             assigned and report what you did.",
            member_id, inner.config.name
        ))
        .with_cancel(cancel)
        .with_inbox(inbox)
        .with_stop_flag(stop_flag);
    if let Some(compression) = &inner.config.compression {
        config = config.with_compression(compression.clone());
    }

    let agent = AgentLoop::new(
        inner.provider.clone(),
        inner.tools.clone(),
        inner.approvals.clone(),
        config,
        inner.events.clone(),
    );

    let outcome = agent
        .run(vec![Message::user(format!(
            "Task {}: {}\n\n{}",
            task.id, task.subject, task.description
        ))])
        .await;

    // Free the slot before bookkeeping so a queued member can start
    drop(permit);

    let wound_down = wind_down.load(Ordering::SeqCst);
    let finished = matches!(
        outcome.reason,
        LoopEndReason::Completed | LoopEndReason::MaxIterations
    ) && !wound_down;

    {
        let mut state = inner.state.lock();
        if let Some(record) = state.members.get_mut(&member_id) {
            record.info.status = MemberStatus::Stopped;
            record.info.tool_calls = outcome.tool_calls;
            record.info.usage = outcome.usage;
        }

        let externally_completed = state
            .board
            .get(task.id)
            .map(|t| t.status == super::task::TaskStatus::Completed)
            .unwrap_or(false);

        if !externally_completed {
            if finished {
                let _ = state.board.complete(task.id, outcome.final_text.clone());
            } else {
                let _ = state.board.release(task.id);
            }
        }
    }

    inner.bus.unregister(member_id);

    if wound_down {
        let _ = inner.bus.deliver(&TeamMessage::shutdown_response(
            member_id.short(),
            inner.lead_id,
            format!("stopped after current iteration; task {} released", task.id),
        ));
    }

    match &outcome.reason {
        LoopEndReason::Completed | LoopEndReason::MaxIterations if finished => {
            let _ = inner.completion_tx.send(CompletionNotice {
                member: member_id.short(),
                task: task.id,
                subject: task.subject.clone(),
                report: outcome.final_text.clone(),
            });
        }
        LoopEndReason::Error(e) => {
            warn!(member = %member_id, task = %task.id, "member failed: {}", e);
            inner.lead_inbox.push(InboundMessage::new(
                member_id.short(),
                format!("task {} ({}) failed: {}", task.id, task.subject, e),
            ));
        }
        _ => {}
    }

    // A wound-down member must not re-claim the task it just released
    if !wound_down && !inner.cancel.is_cancelled() {
        TeamInner::dispatch(&inner);
    }
}

/// Coalesces completion notices inside the debounce window, delivers
/// one message to the lead, and wakes the lead loop, bounded by the
/// auto-trigger ceiling.
async fn completion_notifier(
    inner: Arc<TeamInner>,
    mut rx: mpsc::UnboundedReceiver<CompletionNotice>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];

        let deadline = tokio::time::sleep(inner.config.completion_debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = inner.cancel.cancelled() => return,
                more = rx.recv() => match more {
                    Some(notice) => batch.push(notice),
                    None => break,
                },
            }
        }

        let content = batch
            .iter()
            .map(|n| {
                format!(
                    "task {} ({}) completed by {}: {}",
                    n.task, n.subject, n.member, n.report
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        inner
            .lead_inbox
            .push(InboundMessage::new("team", content));

        let fired = inner.auto_triggers.fetch_add(1, Ordering::SeqCst);
        if fired < inner.config.max_auto_triggers {
            let _ = inner.wake_tx.send(());
        } else {
            warn!(
                team = %inner.config.name,
                ceiling = inner.config.max_auto_triggers,
                "auto-trigger ceiling reached; lead will not be woken automatically"
            );
        }
    }
}
