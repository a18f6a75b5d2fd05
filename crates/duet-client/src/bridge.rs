use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duet_net::{Connectivity, FileTransfer, MessageChannel};
use duet_shared::ChannelNotification;

use crate::config::ClientConfig;
use crate::events::{ClientEvent, EventBus};
use crate::session::ChatSession;

/// Start the connectivity probe against the configured server and forward
/// every change onto the event bus. The bridge ends when the probe does.
pub fn spawn_connectivity_bridge(config: &ClientConfig, events: EventBus) -> JoinHandle<()> {
    let client = reqwest::Client::new();
    let (rx, probe) = duet_net::spawn_probe(
        client,
        config.base_url.clone(),
        config.probe_interval,
        config.probe_timeout,
    );

    tokio::spawn(async move {
        forward_connectivity(rx, events).await;
        probe.abort();
    })
}

async fn forward_connectivity(mut rx: watch::Receiver<Connectivity>, events: EventBus) {
    info!("connectivity bridge started");

    loop {
        let state = rx.borrow_and_update().clone();
        events.emit(ClientEvent::connectivity(&state));
        if rx.changed().await.is_err() {
            break;
        }
    }

    debug!("connectivity bridge stopped");
}

/// Feed channel notifications into the session until the transport closes
/// its side.
pub fn spawn_channel_bridge<T, C>(
    session: ChatSession<T, C>,
    mut notifications: mpsc::Receiver<ChannelNotification>,
) -> JoinHandle<()>
where
    T: FileTransfer,
    C: MessageChannel,
{
    tokio::spawn(async move {
        info!(room_id = %session.room_id(), "channel bridge started");

        while let Some(notification) = notifications.recv().await {
            if let Err(e) = session.handle_notification(notification).await {
                warn!(room_id = %session.room_id(), error = %e, "notification not handled");
            }
        }

        debug!(room_id = %session.room_id(), "channel bridge stopped");
    })
}
