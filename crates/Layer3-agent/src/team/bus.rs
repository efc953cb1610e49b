//! Team message bus
//!
//! Routes `TeamMessage`s into member inboxes. Delivery is a queue push;
//! the receiving loop picks it up at its next iteration boundary.

use super::member::MemberId;
use super::message::{Recipient, TeamMessage};
use crate::inbox::{InboundMessage, Inbox};
use ensemble_foundation::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MessageBus {
    inboxes: Mutex<HashMap<MemberId, Inbox>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: MemberId, inbox: Inbox) {
        self.inboxes.lock().insert(id, inbox);
    }

    pub fn unregister(&self, id: MemberId) {
        self.inboxes.lock().remove(&id);
    }

    pub fn registered_count(&self) -> usize {
        self.inboxes.lock().len()
    }

    /// Route a message to its recipient inbox(es).
    pub fn deliver(&self, message: &TeamMessage) -> Result<()> {
        let inboxes = self.inboxes.lock();
        match message.to {
            Recipient::Member(id) => {
                let inbox = inboxes
                    .get(&id)
                    .ok_or_else(|| Error::Team(format!("no inbox registered for member {}", id)))?;
                inbox.push(InboundMessage::new(&message.from, &message.content));
                debug!(to = %id, kind = ?message.kind, "delivered team message");
            }
            Recipient::All => {
                for (id, inbox) in inboxes.iter() {
                    // Senders are labelled by short id; skip echoing back
                    if id.short() == message.from {
                        continue;
                    }
                    inbox.push(InboundMessage::new(&message.from, &message.content));
                }
                debug!(kind = ?message.kind, "broadcast team message");
            }
        }
        Ok(())
    }
}
