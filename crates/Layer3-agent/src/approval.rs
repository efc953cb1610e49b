//! Tool approval
//!
//! The engine asks an `ApprovalHandler` before running a mutating tool.
//! `ApprovalBroker` is the channel-backed implementation: the engine
//! blocks on a oneshot keyed by tool call id while an out-of-band
//! resolver (UI, lead agent, test harness) answers exactly once.

use async_trait::async_trait;
use ensemble_foundation::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Decides whether a tool call may run
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Resolve to `Ok(true)` to approve, `Ok(false)` to deny.
    /// May block indefinitely; the engine races it against cancellation.
    async fn request_approval(&self, call_id: &str, tool_name: &str, input: &Value)
        -> Result<bool>;
}

/// Approves everything. Useful for tests and trusted tool sets.
pub struct ApproveAll;

#[async_trait]
impl ApprovalHandler for ApproveAll {
    async fn request_approval(&self, _call_id: &str, _tool_name: &str, _input: &Value) -> Result<bool> {
        Ok(true)
    }
}

/// Denies everything.
pub struct DenyAll;

#[async_trait]
impl ApprovalHandler for DenyAll {
    async fn request_approval(&self, _call_id: &str, _tool_name: &str, _input: &Value) -> Result<bool> {
        Ok(false)
    }
}

/// An approval waiting on a decision
#[derive(Debug)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_name: String,
    pub input: Value,
}

/// Channel-backed approval handler.
///
/// Each request parks a oneshot sender under its call id and publishes
/// an `ApprovalRequest` to the subscriber. `resolve` consumes the
/// sender, so a second resolution for the same id is a no-op.
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    notify_tx: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ApprovalBroker {
    /// Create a broker and the request stream its resolver consumes.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let broker = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            notify_tx,
        });
        (broker, notify_rx)
    }

    /// Deliver a decision. Returns `false` when the id is unknown or
    /// already resolved.
    pub fn resolve(&self, call_id: &str, approved: bool) -> bool {
        let sender = self.pending.lock().remove(call_id);
        match sender {
            Some(tx) => tx.send(approved).is_ok(),
            None => {
                debug!("approval for unknown or already-resolved call {}", call_id);
                false
            }
        }
    }

    /// Number of requests still waiting on a decision
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalBroker {
    async fn request_approval(&self, call_id: &str, tool_name: &str, input: &Value) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id.to_string(), tx);

        let request = ApprovalRequest {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            input: input.clone(),
        };
        if self.notify_tx.send(request).is_err() {
            // Resolver side is gone; nobody can ever answer
            self.pending.lock().remove(call_id);
            return Err(Error::Internal("approval resolver disconnected".into()));
        }

        rx.await
            .map_err(|_| Error::Internal("approval request dropped without a decision".into()))
    }
}
