//! Events published to the UI shell.
//!
//! Every state change the views care about goes out on a broadcast channel;
//! a shell forwards them to its own event system under [`ClientEvent::name`].

use serde::Serialize;
use tokio::sync::broadcast;

use duet_net::Connectivity;
use duet_shared::{MessageId, RoomId, TransferStatus};

use crate::progress::ProgressEntry;

pub const EVENT_MESSAGE_ADDED: &str = "message-added";
pub const EVENT_MESSAGE_UPDATED: &str = "message-updated";
pub const EVENT_TRANSFER_PROGRESS: &str = "transfer-progress";
pub const EVENT_TRANSFER_FINISHED: &str = "transfer-finished";
pub const EVENT_PEER_CONNECTED: &str = "peer-connected";
pub const EVENT_PEER_DISCONNECTED: &str = "peer-disconnected";
pub const EVENT_CONNECTIVITY_CHANGED: &str = "connectivity-changed";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    MessageAdded { room_id: RoomId, id: MessageId },
    MessageUpdated { id: MessageId, status: TransferStatus },
    TransferProgress(ProgressEntry),
    /// Progress entry removed; the transfer is no longer active.
    TransferFinished { id: MessageId },
    PeerConnected { room_id: RoomId },
    PeerDisconnected { room_id: RoomId },
    ConnectivityChanged { online: bool, reason: Option<String> },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageAdded { .. } => EVENT_MESSAGE_ADDED,
            Self::MessageUpdated { .. } => EVENT_MESSAGE_UPDATED,
            Self::TransferProgress(_) => EVENT_TRANSFER_PROGRESS,
            Self::TransferFinished { .. } => EVENT_TRANSFER_FINISHED,
            Self::PeerConnected { .. } => EVENT_PEER_CONNECTED,
            Self::PeerDisconnected { .. } => EVENT_PEER_DISCONNECTED,
            Self::ConnectivityChanged { .. } => EVENT_CONNECTIVITY_CHANGED,
        }
    }

    pub fn connectivity(state: &Connectivity) -> Self {
        match state {
            Connectivity::Offline(reason) => Self::ConnectivityChanged {
                online: false,
                reason: Some(reason.to_string()),
            },
            other => Self::ConnectivityChanged {
                online: other.is_online(),
                reason: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "no event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
