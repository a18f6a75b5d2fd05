//! One open conversation.
//!
//! A [`ChatSession`] is built when a chat view opens and dropped when it
//! closes. It owns the room key, the message list, and the transfer
//! coordinator, and is the only place that talks to the messaging channel
//! and the local store for that room.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use duet_media::{extract_audio_metadata, persist_artwork, persist_preview, MediaProbe};
use duet_net::{FileTransfer, MessageChannel};
use duet_shared::attachment::classify_path;
use duet_shared::constants::VOICE_FILE_NAME;
use duet_shared::crypto::{derive_room_key, open_text, seal_text};
use duet_shared::format::format_size;
use duet_shared::protocol::remote_url;
use duet_shared::{
    Affordance, Attachment, AttachmentKind, AudioAttachment, Body, ChannelNotification, Envelope,
    InboundEnvelope, MediaSource, Message, MessageId, OutboundEvent, Participant, Receipt, Room, RoomId,
    RoomKey, TransferEvent, TransferStatus,
};
use duet_store::{Blob, Database, User};

use crate::config::ClientConfig;
use crate::coordinator::{file_prefix, TransferCoordinator, TransferOutcome, TransferSettings};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::progress::ProgressEntry;
use crate::state::{lock, SessionState, SharedState};

/// Shown in place of text that does not decrypt with the room key.
pub const UNDECRYPTABLE_TEXT: &str = "[unable to decrypt]";

pub type SharedDatabase = Arc<Mutex<Database>>;

/// External services a session runs against.
pub struct Collaborators<T, C> {
    pub transfer: Arc<T>,
    pub channel: Arc<C>,
    /// `None` keeps the session in memory only.
    pub store: Option<SharedDatabase>,
    pub events: EventBus,
}

/// What [`ChatSession::act`] did for a message.
#[derive(Debug)]
pub enum Action {
    /// The attachment is on the device; the shell opens it.
    Open(PathBuf),
    Started(JoinHandle<TransferOutcome>),
    /// `false` when the request was ignored because another cancel is pending.
    Cancelled(bool),
}

pub struct ChatSession<T, C> {
    config: Arc<ClientConfig>,
    room_id: RoomId,
    key: Arc<RoomKey>,
    persist_on_server: bool,
    state: SharedState,
    transfers: TransferCoordinator<T>,
    channel: Arc<C>,
    store: Option<SharedDatabase>,
    events: EventBus,
}

impl<T, C> Clone for ChatSession<T, C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            room_id: self.room_id.clone(),
            key: self.key.clone(),
            persist_on_server: self.persist_on_server,
            state: self.state.clone(),
            transfers: self.transfers.clone(),
            channel: self.channel.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T: FileTransfer, C: MessageChannel> ChatSession<T, C> {
    /// Open the room shared by `viewer` and `contact`, loading its history
    /// from the store when there is one.
    pub fn open(
        config: Arc<ClientConfig>,
        room_id: RoomId,
        viewer: Participant,
        contact: Participant,
        parts: Collaborators<T, C>,
    ) -> Result<Self> {
        let key = derive_room_key(&room_id, &config.kdf_params())?;

        let stored = match &parts.store {
            Some(store) => store.lock().map_err(|_| ClientError::LockPoisoned)?.find_room(&room_id)?,
            None => None,
        };
        let room = match stored {
            Some(mut room) => {
                settle_interrupted(&mut room, &viewer);
                debug!(room_id = %room_id, messages = room.messages.len(), "room loaded");
                room
            }
            None => Room::new(room_id.clone(), viewer.clone(), contact),
        };

        let state: SharedState = Arc::new(Mutex::new(SessionState::new(viewer, room)));
        let transfers = TransferCoordinator::new(
            parts.transfer,
            state.clone(),
            parts.events.clone(),
            TransferSettings {
                upload_url: config.upload_url(),
                media_dir: config.media_dir.clone(),
                progress_interval: config.progress_interval,
            },
        );

        info!(room_id = %room_id, "chat session opened");
        Ok(Self {
            config,
            room_id,
            key: Arc::new(key),
            persist_on_server: true,
            state,
            transfers,
            channel: parts.channel,
            store: parts.store,
            events: parts.events,
        })
    }

    /// Whether outbound envelopes ask the server to keep a copy for
    /// offline delivery. On by default.
    pub fn with_server_persistence(mut self, persist: bool) -> Self {
        self.persist_on_server = persist;
        self
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn transfers(&self) -> &TransferCoordinator<T> {
        &self.transfers
    }

    /// Snapshot of the message list, newest first.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().map(|s| s.room.messages.clone()).unwrap_or_default()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.state.lock().ok().and_then(|s| s.message(id).cloned())
    }

    pub fn progress(&self, id: &MessageId) -> Option<ProgressEntry> {
        self.state.lock().ok().and_then(|s| s.progress.get(id).cloned())
    }

    pub async fn send_text(&self, text: &str, reply_to: Option<&MessageId>) -> Result<MessageId> {
        let sealed = seal_text(text, &self.key)?;
        let message = {
            let mut s = lock(&self.state)?;
            let mut message = Message::text(s.viewer.clone(), text);
            message.reply = reply_to.and_then(|id| s.message(id)).map(Message::reply_ref);
            s.room.prepend(message.clone());
            message
        };

        self.added(&message.id);
        self.persist().await;

        self.channel
            .emit(OutboundEvent::text(self.envelope(&message, sealed)))
            .await?;
        debug!(msg_id = %message.id, "text sent");
        Ok(message.id)
    }

    /// Send a file. The message shows up at once as `uploading`; the
    /// returned handle resolves when the upload and its announcement on
    /// the channel are done.
    pub async fn send_attachment(
        &self,
        path: PathBuf,
        mime_type: Option<String>,
        text: &str,
    ) -> Result<(MessageId, JoinHandle<TransferOutcome>)> {
        let kind = classify_path(&path, mime_type.as_deref());
        let file_name = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
        let bytes = tokio::fs::metadata(&path).await?.len();

        let mut attachment = Attachment::new(MediaSource::Local(path.clone()));
        attachment.file_name = file_name;
        attachment.mime_type = mime_type;
        attachment.size = Some(format_size(bytes));

        let mut body = Body::from_kind(kind, attachment);
        if let Body::Audio(audio) = &mut body {
            self.fill_audio_metadata(&path, audio).await;
        }

        self.submit(body, text).await
    }

    /// Send a recorded voice note of `duration_secs` seconds.
    pub async fn send_voice(&self, path: PathBuf, duration_secs: f64) -> Result<(MessageId, JoinHandle<TransferOutcome>)> {
        let bytes = tokio::fs::metadata(&path).await?.len();

        let mut attachment = Attachment::new(MediaSource::Local(path));
        attachment.file_name = Some(VOICE_FILE_NAME.to_string());
        attachment.size = Some(format_size(bytes));
        attachment.duration_secs = Some(duration_secs);

        self.submit(Body::from_kind(AttachmentKind::Audio, attachment), "").await
    }

    /// Add a message delivered by the channel and confirm it to the sender.
    /// Returns `false` for a message of another room or an id already in
    /// the list.
    pub async fn receive(&self, envelope: InboundEnvelope) -> Result<bool> {
        if envelope.room_id != self.room_id {
            debug!(msg_id = %envelope.id, room_id = %envelope.room_id, "message for another room ignored");
            return Ok(false);
        }
        if self.message(&envelope.id).is_some() {
            debug!(msg_id = %envelope.id, "duplicate message ignored");
            self.acknowledge(&envelope.id, &envelope.user).await;
            return Ok(false);
        }

        let text = match open_text(&envelope.text, &self.key) {
            Ok(text) => text,
            Err(e) => {
                warn!(msg_id = %envelope.id, error = %e, "message text did not decrypt");
                UNDECRYPTABLE_TEXT.to_string()
            }
        };

        let body = match envelope.attachment_ref() {
            Some((kind, path)) => {
                let mut attachment = Attachment::new(MediaSource::Remote(remote_url(&self.config.base_url, path)));
                attachment.file_name = envelope.file_name.clone();
                attachment.mime_type = envelope.mime_type.clone();
                attachment.size = envelope.size.map(format_size);
                attachment.duration_secs = envelope.duration;
                if let Some(encoded) = envelope.preview.as_deref() {
                    attachment.preview = self.save_preview(&envelope.id, encoded).await;
                }
                Body::from_kind(kind, attachment)
            }
            None => Body::Text,
        };
        let status = if body.kind().is_some() {
            TransferStatus::INBOUND
        } else {
            TransferStatus::Available
        };

        let id = envelope.id.clone();
        let sender = envelope.user.clone();
        let message = Message {
            id: envelope.id,
            sender: envelope.user,
            created_at: envelope.created_at,
            text,
            reply: envelope.reply,
            status,
            body,
            received: false,
        };

        let added = lock(&self.state)?.room.prepend(message);
        if !added {
            debug!(msg_id = %id, "duplicate message ignored");
            return Ok(false);
        }

        let user = User::from(&sender);
        if let Some(Err(e)) = self.with_store(move |db| Ok(db.upsert_user(&user)?)).await {
            warn!(user_id = %sender.id, error = %e, "could not store sender");
        }

        self.added(&id);
        self.persist().await;
        self.acknowledge(&id, &sender).await;
        Ok(true)
    }

    pub async fn handle_notification(&self, notification: ChannelNotification) -> Result<()> {
        match notification {
            ChannelNotification::Message(envelope) => {
                self.receive(envelope).await?;
            }
            ChannelNotification::Delivered { id, room_id } => {
                if room_id == self.room_id {
                    self.mark_received(&id).await?;
                } else {
                    debug!(msg_id = %id, room_id = %room_id, "receipt for another room ignored");
                }
            }
            ChannelNotification::PeerConnected { room_id } => {
                self.events.emit(ClientEvent::PeerConnected { room_id });
            }
            ChannelNotification::PeerDisconnected { room_id } => {
                self.events.emit(ClientEvent::PeerDisconnected { room_id });
            }
        }
        Ok(())
    }

    /// Run whatever the attachment control of `id` currently offers.
    pub async fn act(&self, id: &MessageId) -> Result<Action> {
        let (view, local) = {
            let s = lock(&self.state)?;
            let message = s.message(id).ok_or_else(|| ClientError::UnknownMessage(id.clone()))?;
            let view = message
                .affordance(s.viewer_id())
                .ok_or_else(|| ClientError::NotAnAttachment(id.clone()))?;
            let local = message.attachment().and_then(|a| a.source.local_path().cloned());
            (view, local)
        };

        debug!(msg_id = %id, kind = ?view.kind, affordance = ?view.affordance, "attachment action");
        match view.affordance {
            Affordance::Open => local.map(Action::Open).ok_or_else(|| ClientError::NoLocalFile(id.clone())),
            Affordance::Download | Affordance::RetryDownload => {
                let download = self.transfers.start_download(id)?;
                Ok(Action::Started(self.follow_download(id.clone(), download)))
            }
            Affordance::Upload | Affordance::RetryUpload => {
                let upload = self.transfers.start_upload(id)?;
                Ok(Action::Started(self.follow_upload(id.clone(), upload)))
            }
            Affordance::CancelDownload | Affordance::CancelUpload => {
                let cancelled = self.transfers.cancel(id).await?;
                if cancelled {
                    self.persist().await;
                }
                Ok(Action::Cancelled(cancelled))
            }
        }
    }

    /// Playback duration of a local attachment, measured once and then kept
    /// on the message.
    pub async fn ensure_duration(&self, id: &MessageId, probe: &impl MediaProbe) -> Result<Option<f64>> {
        let (cached, path) = {
            let s = lock(&self.state)?;
            let message = s.message(id).ok_or_else(|| ClientError::UnknownMessage(id.clone()))?;
            let attachment = message
                .attachment()
                .ok_or_else(|| ClientError::NotAnAttachment(id.clone()))?;
            (attachment.duration_secs, attachment.source.local_path().cloned())
        };
        if cached.is_some() {
            return Ok(cached);
        }
        let Some(path) = path else {
            return Ok(None);
        };

        let secs = match probe.duration(&path).await {
            Ok(secs) => secs,
            Err(e) => {
                warn!(msg_id = %id, error = %e, "duration probe failed");
                return Ok(None);
            }
        };

        if let Some(secs) = secs {
            lock(&self.state)?.room.update(id, |m| {
                if let Some(a) = m.body.attachment_mut() {
                    a.duration_secs = Some(secs);
                }
            });
            self.persist().await;
        }
        Ok(secs)
    }

    /// Signal every running transfer to stop and write the room out.
    pub async fn shutdown(&self) {
        if let Ok(s) = self.state.lock() {
            for handle in s.active.values() {
                handle.cancel.cancel();
            }
        }
        self.persist().await;
        info!(room_id = %self.room_id, "chat session closed");
    }

    async fn submit(&self, body: Body, text: &str) -> Result<(MessageId, JoinHandle<TransferOutcome>)> {
        let id = {
            let mut s = lock(&self.state)?;
            let message = Message::outbound(s.viewer.clone(), body, text);
            let id = message.id.clone();
            s.room.prepend(message);
            id
        };

        self.added(&id);
        self.persist().await;
        self.record_blob(&id, false).await;

        let upload = self.transfers.start_upload(&id)?;
        Ok((id.clone(), self.follow_upload(id, upload)))
    }

    /// Announce a finished upload on the channel and flag its file as held
    /// by the server.
    fn follow_upload(&self, id: MessageId, upload: JoinHandle<TransferOutcome>) -> JoinHandle<TransferOutcome> {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = join_outcome(&id, upload).await;
            if outcome == TransferOutcome::Completed {
                if let Err(e) = this.announce(&id).await {
                    error!(msg_id = %id, error = %e, "uploaded attachment not announced");
                }
                this.mark_uploaded(&id).await;
            }
            this.persist().await;
            outcome
        })
    }

    fn follow_download(&self, id: MessageId, download: JoinHandle<TransferOutcome>) -> JoinHandle<TransferOutcome> {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = join_outcome(&id, download).await;
            if outcome == TransferOutcome::Completed {
                this.record_blob(&id, true).await;
            }
            this.persist().await;
            outcome
        })
    }

    async fn announce(&self, id: &MessageId) -> Result<()> {
        let message = self.message(id).ok_or_else(|| ClientError::UnknownMessage(id.clone()))?;
        let kind = message.kind().ok_or_else(|| ClientError::NotAnAttachment(id.clone()))?;
        let sealed = seal_text(&message.text, &self.key)?;
        self.channel
            .emit(OutboundEvent::attachment(kind, self.envelope(&message, sealed)))
            .await?;
        debug!(msg_id = %id, kind = ?kind, "attachment announced");
        Ok(())
    }

    /// Tell the sender of `id` that the message arrived here.
    async fn acknowledge(&self, id: &MessageId, sender: &Participant) {
        let Ok(viewer) = lock(&self.state).map(|s| s.viewer.clone()) else {
            return;
        };
        let receipt = Receipt {
            message_id: id.clone(),
            room_id: self.room_id.clone(),
            contact: viewer,
            user_id: sender.id.clone(),
        };
        if let Err(e) = self.channel.emit(OutboundEvent::receipt(receipt)).await {
            warn!(msg_id = %id, error = %e, "receipt not sent");
        }
    }

    async fn mark_received(&self, id: &MessageId) -> Result<()> {
        let status = lock(&self.state)?.room.update(id, |m| {
            m.received = true;
            m.status
        });
        let Some(status) = status else {
            debug!(msg_id = %id, "receipt for unknown message");
            return Ok(());
        };

        self.events.emit(ClientEvent::MessageUpdated { id: id.clone(), status });
        self.persist().await;
        debug!(msg_id = %id, "message received by contact");
        Ok(())
    }

    /// Write an inbound preview under the media directory. A preview that
    /// cannot be decoded or written is dropped.
    async fn save_preview(&self, id: &MessageId, encoded: &str) -> Option<String> {
        match persist_preview(&self.config.media_dir, &file_prefix(id), encoded).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!(msg_id = %id, error = %e, "preview not saved");
                None
            }
        }
    }

    async fn fill_audio_metadata(&self, path: &Path, audio: &mut AudioAttachment) {
        let fallback_title = audio.media.file_name.clone();
        match extract_audio_metadata(path).await {
            Ok(meta) => {
                audio.title = meta.title.clone().or(fallback_title);
                audio.artist = meta.artist.clone();
                audio.media.duration_secs = meta.duration_secs();
                if let Some(bytes) = meta.artwork.as_deref() {
                    let name = audio.media.file_name.as_deref().unwrap_or("audio");
                    match persist_artwork(&self.config.media_dir, name, bytes).await {
                        Ok(artwork) => audio.artwork = Some(artwork),
                        Err(e) => warn!(path = %path.display(), error = %e, "artwork not saved"),
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "audio metadata unavailable");
                audio.title = fallback_title;
            }
        }
    }

    /// Hash the local file of `id` and record it in the blob table.
    async fn record_blob(&self, id: &MessageId, is_uploaded: bool) {
        if self.store.is_none() {
            return;
        }
        let Some(path) = self
            .message(id)
            .and_then(|m| m.attachment().and_then(|a| a.source.local_path().cloned()))
        else {
            return;
        };

        let message_id = id.clone();
        let hashed = tokio::task::spawn_blocking(move || Blob::from_file(message_id, &path, is_uploaded)).await;
        let blob = match hashed {
            Ok(Ok(blob)) => blob,
            Ok(Err(e)) => {
                warn!(msg_id = %id, error = %e, "file not hashed");
                return;
            }
            Err(e) => {
                warn!(msg_id = %id, error = %e, "hashing task failed");
                return;
            }
        };

        if let Some(Err(e)) = self.with_store(move |db| Ok(db.insert_blob(&blob)?)).await {
            warn!(msg_id = %id, error = %e, "blob not recorded");
        }
    }

    async fn mark_uploaded(&self, id: &MessageId) {
        let message_id = id.clone();
        match self.with_store(move |db| Ok(db.mark_uploaded(&message_id)?)).await {
            Some(Ok(true)) | None => {}
            // Recording failed when the message was created.
            Some(Ok(false)) => self.record_blob(id, true).await,
            Some(Err(e)) => warn!(msg_id = %id, error = %e, "upload not recorded"),
        }
    }

    fn envelope(&self, message: &Message, sealed: String) -> Envelope {
        let attachment = message.attachment();
        Envelope {
            id: message.id.clone(),
            text: sealed,
            created_at: message.created_at,
            user: message.sender.clone(),
            room_id: self.room_id.clone(),
            persist_on_server: self.persist_on_server,
            file_name: attachment.and_then(|a| a.file_name.clone()),
            mime_type: attachment.and_then(|a| a.mime_type.clone()),
            duration: attachment.and_then(|a| a.duration_secs),
            reply: message.reply.clone(),
        }
    }

    fn added(&self, id: &MessageId) {
        self.events.emit(ClientEvent::MessageAdded {
            room_id: self.room_id.clone(),
            id: id.clone(),
        });
    }

    /// Write the room out. Failures are logged; the in-memory list stays
    /// authoritative for the session.
    async fn persist(&self) {
        let state = self.state.clone();
        // Snapshot under the database lock so the last write holds the
        // newest list.
        let written = self
            .with_store(move |db| {
                let room = lock(&state)?.room.clone();
                db.put_room(&room)?;
                Ok(())
            })
            .await;
        if let Some(Err(e)) = written {
            warn!(room_id = %self.room_id, error = %e, "room not persisted");
        }
    }

    /// Run a store operation on the blocking pool. `None` without a store.
    async fn with_store<R, F>(&self, op: F) -> Option<Result<R>>
    where
        R: Send + 'static,
        F: FnOnce(&Database) -> Result<R> + Send + 'static,
    {
        let store = self.store.clone()?;
        let joined = tokio::task::spawn_blocking(move || {
            let db = store.lock().map_err(|_| ClientError::LockPoisoned)?;
            op(&db)
        })
        .await;
        Some(joined.unwrap_or_else(|e| Err(e.into())))
    }
}

async fn join_outcome(id: &MessageId, task: JoinHandle<TransferOutcome>) -> TransferOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(msg_id = %id, error = %e, "transfer task ended abnormally");
            TransferOutcome::Failed
        }
    }
}

/// Transfers do not survive a restart. A stored message still marked
/// in flight is treated as interrupted so its control offers a fresh start.
fn settle_interrupted(room: &mut Room, viewer: &Participant) {
    for message in room.messages.iter_mut().filter(|m| m.status.is_in_flight()) {
        if let Err(e) = message.apply(TransferEvent::Interrupted, &viewer.id) {
            warn!(msg_id = %message.id, error = %e, "could not settle stored transfer");
        }
    }
}
