use std::future::Future;

use tokio::sync::mpsc;
use tracing::debug;

use duet_shared::OutboundEvent;

use crate::error::ChannelError;

/// Outbound side of the real-time messaging transport.
pub trait MessageChannel: Send + Sync + 'static {
    fn emit(&self, event: OutboundEvent) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

/// [`MessageChannel`] feeding an mpsc queue drained by the transport task.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<OutboundEvent>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self { tx }
    }

    /// A sender and the receiving end the transport task reads from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

impl MessageChannel for ChannelSender {
    async fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        debug!(event = event.name, msg_id = %event.message_id(), "emitting");
        self.tx.send(event).await.map_err(|_| ChannelError::Closed)
    }
}
