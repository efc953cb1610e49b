//! Concurrency Limiter
//!
//! A cancellable counting semaphore with FIFO admission. One instance is
//! shared for synchronous delegate execution; each active team gets its
//! own so teams do not starve each other.
//!
//! Invariants:
//! - `active_count()` never exceeds the configured maximum.
//! - A release always hands the slot to the oldest live waiter.
//! - A cancelled waiter is removed from the queue and never admitted;
//!   a racing grant is handed back.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default maximum concurrent admissions
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// A queued acquire waiting for a slot
struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

struct LimiterState {
    max: usize,
    active: usize,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

/// Cancellable counting semaphore with FIFO admission
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Mutex<LimiterState>>,
}

impl ConcurrencyLimiter {
    /// Create a limiter with the given capacity (minimum 1)
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterState {
                max: max_concurrent.max(1),
                active: 0,
                next_ticket: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Number of currently admitted holders
    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    /// Number of queued waiters
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Remaining capacity
    pub fn available(&self) -> usize {
        let state = self.inner.lock();
        state.max.saturating_sub(state.active)
    }

    /// Configured maximum
    pub fn max_concurrent(&self) -> usize {
        self.inner.lock().max
    }

    /// Acquire one slot, queueing in FIFO order when at capacity.
    ///
    /// Fails with `Error::Cancelled` if the token fires while queued;
    /// a cancelled waiter is never admitted.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (ticket, rx) = {
            let mut state = self.inner.lock();
            if state.active < state.max {
                state.active += 1;
                trace!(active = state.active, "limiter: admitted immediately");
                return Ok(Permit {
                    inner: self.inner.clone(),
                });
            }

            let (tx, rx) = oneshot::channel();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiters.push_back(Waiter { ticket, tx });
            trace!(ticket, queued = state.waiters.len(), "limiter: queued");
            (ticket, rx)
        };

        tokio::select! {
            granted = rx => match granted {
                // Slot was transferred to us by a releasing holder.
                Ok(()) => Ok(Permit {
                    inner: self.inner.clone(),
                }),
                Err(_) => Err(Error::Internal("limiter dropped while waiting".into())),
            },
            _ = cancel.cancelled() => {
                let was_queued = {
                    let mut state = self.inner.lock();
                    let before = state.waiters.len();
                    state.waiters.retain(|w| w.ticket != ticket);
                    state.waiters.len() < before
                };
                if !was_queued {
                    // Grant raced with cancellation: the slot is already
                    // counted for us, hand it back instead of leaking it.
                    release_slot(&self.inner);
                }
                trace!(ticket, "limiter: waiter cancelled");
                Err(Error::Cancelled)
            }
        }
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

/// One admission unit. Releasing happens on drop.
pub struct Permit {
    inner: Arc<Mutex<LimiterState>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        release_slot(&self.inner);
    }
}

/// Hand the slot to the oldest live waiter, or free it.
///
/// Single critical section: the grant is sent while holding the lock so
/// queue removal (cancellation) and slot transfer cannot interleave.
fn release_slot(inner: &Arc<Mutex<LimiterState>>) {
    let mut state = inner.lock();

    while let Some(waiter) = state.waiters.pop_front() {
        if waiter.tx.send(()).is_ok() {
            // Slot transferred; active count unchanged.
            trace!(ticket = waiter.ticket, "limiter: slot handed to waiter");
            return;
        }
        // Receiver dropped without cancelling through us; skip it.
    }

    state.active = state.active.saturating_sub(1);
}
