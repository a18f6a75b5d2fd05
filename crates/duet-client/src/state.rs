//! Per-session mutable state.
//!
//! [`SessionState`] lives behind `Arc<Mutex<_>>` and is shared by the chat
//! session, the transfer coordinator and every running transfer task. Locks
//! are held only for short synchronous read-modify-write steps, never across
//! an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use duet_net::CancelToken;
use duet_shared::{Direction, Message, MessageId, Participant, Room, UserId};

use crate::error::{ClientError, Result};
use crate::progress::ProgressEntry;

/// A running transfer in the active set.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    /// Distinguishes a restarted transfer from the one a cancel was aimed at.
    pub task: u64,
    pub direction: Direction,
    pub cancel: CancelToken,
    /// Flips to `true` once the transfer task has finished.
    pub done: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct SessionState {
    /// The local user.
    pub viewer: Participant,
    pub room: Room,
    /// At most one entry per message id.
    pub active: HashMap<MessageId, TransferHandle>,
    pub progress: HashMap<MessageId, ProgressEntry>,
    /// Message whose cancellation is in progress. A second cancel request
    /// is ignored while this is set.
    pub pending_cancel: Option<MessageId>,
}

impl SessionState {
    pub fn new(viewer: Participant, room: Room) -> Self {
        Self {
            viewer,
            room,
            active: HashMap::new(),
            progress: HashMap::new(),
            pending_cancel: None,
        }
    }

    pub fn viewer_id(&self) -> &UserId {
        &self.viewer.id
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.room.find(id)
    }

    pub fn is_active(&self, id: &MessageId) -> bool {
        self.active.contains_key(id)
    }
}

pub type SharedState = Arc<Mutex<SessionState>>;

pub fn lock(state: &SharedState) -> Result<MutexGuard<'_, SessionState>> {
    state.lock().map_err(|_| ClientError::LockPoisoned)
}
