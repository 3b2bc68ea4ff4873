//! Per-session input mailboxes feeding the tick.
//!
//! Any number of connection readers may post for a session; each mailbox
//! holds at most one queued input and a newer post overwrites the older
//! (latest wins). The tick is the only consumer: `take()` atomically claims
//! and clears the slot, so a producer racing the tick can never cause the
//! same frame to be applied twice.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::net::protocol::{InputFrame, SessionId};

/// Single-slot latest-wins mailbox for one session
#[derive(Debug, Default)]
pub struct InputMailbox {
    slot: Mutex<Option<InputFrame>>,
}

impl InputMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post an input, replacing any queued one. Returns true when an older
    /// queued input was overwritten.
    pub fn post(&self, frame: InputFrame) -> bool {
        self.slot.lock().replace(frame).is_some()
    }

    /// Atomically claim and clear the queued input
    pub fn take(&self) -> Option<InputFrame> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Registry of mailboxes, one per connected session
#[derive(Default)]
pub struct MailboxRegistry {
    boxes: RwLock<HashMap<SessionId, Arc<InputMailbox>>>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or fetch) the mailbox for a session
    pub fn register(&self, session: SessionId) -> Arc<InputMailbox> {
        self.boxes
            .write()
            .entry(session)
            .or_insert_with(|| Arc::new(InputMailbox::new()))
            .clone()
    }

    /// Drop a session's mailbox; pending input is discarded
    pub fn unregister(&self, session: SessionId) {
        self.boxes.write().remove(&session);
    }

    pub fn get(&self, session: SessionId) -> Option<Arc<InputMailbox>> {
        self.boxes.read().get(&session).cloned()
    }

    /// Claim every queued input. Called once per tick by the single writer.
    pub fn drain(&self, out: &mut Vec<(SessionId, InputFrame)>) {
        let boxes = self.boxes.read();
        for (&session, mailbox) in boxes.iter() {
            if let Some(frame) = mailbox.take() {
                out.push((session, frame));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.read().is_empty()
    }
}
