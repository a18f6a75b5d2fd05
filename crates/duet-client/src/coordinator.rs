//! Transfer coordinator.
//!
//! Owns the active set of a chat session: starts uploads and downloads
//! against a [`FileTransfer`] backend, drives the message status through the
//! transfer state machine, routes backend progress through a
//! [`ProgressAccumulator`], and runs the single-flight cancellation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use duet_net::{
    CancelToken, DownloadRequest, Downloaded, FileTransfer, ProgressFn, TransferError, UploadRequest,
};
use duet_shared::constants::UPLOAD_FIELD_NAME;
use duet_shared::{Direction, InvalidTransition, MediaSource, MessageId, TransferEvent, TransferStatus};

use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::progress::{ProgressAccumulator, ProgressEntry};
use crate::state::{lock, SessionState, SharedState, TransferHandle};

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub upload_url: String,
    /// Downloads land here as `<short id>-<file name>`.
    pub media_dir: PathBuf,
    pub progress_interval: Duration,
}

/// How a transfer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Cancelled by the user or stopped without a result.
    Cancelled,
    Failed,
}

/// Everything a running task needs to report back.
struct Job {
    id: MessageId,
    task: u64,
    cancel: CancelToken,
    progress: ProgressFn,
    accumulator: Arc<Mutex<ProgressAccumulator>>,
    done: watch::Sender<bool>,
}

pub struct TransferCoordinator<T> {
    backend: Arc<T>,
    state: SharedState,
    events: EventBus,
    settings: Arc<TransferSettings>,
}

impl<T> Clone for TransferCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T: FileTransfer> TransferCoordinator<T> {
    pub fn new(backend: Arc<T>, state: SharedState, events: EventBus, settings: TransferSettings) -> Self {
        Self {
            backend,
            state,
            events,
            settings: Arc::new(settings),
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().map(|s| s.active.len()).unwrap_or(0)
    }

    pub fn is_active(&self, id: &MessageId) -> bool {
        self.state.lock().map(|s| s.is_active(id)).unwrap_or(false)
    }

    /// Upload the local file of an own attachment message. The message is
    /// either freshly created (`uploading`) or re-offered after an error or
    /// cancel.
    pub fn start_upload(&self, id: &MessageId) -> Result<JoinHandle<TransferOutcome>> {
        let (request, job) = {
            let mut s = lock(&self.state)?;
            let message = s.message(id).ok_or_else(|| ClientError::UnknownMessage(id.clone()))?;
            let attachment = message
                .attachment()
                .ok_or_else(|| ClientError::NotAnAttachment(id.clone()))?;
            let source = attachment
                .source
                .local_path()
                .cloned()
                .ok_or_else(|| ClientError::NoLocalFile(id.clone()))?;

            let request = UploadRequest {
                url: self.settings.upload_url.clone(),
                source,
                field_name: UPLOAD_FIELD_NAME.to_string(),
                mime_type: attachment.mime_type.clone(),
                parameters: vec![("id".to_string(), id.to_string())],
            };
            let size = attachment.size.clone();
            let job = self.begin(&mut s, id, Direction::Upload, size)?;
            (request, job)
        };

        self.announce(&job);
        info!(msg_id = %id, "upload started");

        let backend = self.backend.clone();
        let this = self.clone();
        Ok(tokio::spawn(async move {
            let result = backend.upload(request, job.cancel.clone(), job.progress.clone()).await;
            let (event, outcome) = match result {
                Ok(ack) if ack.is_ok() => (TransferEvent::Succeeded, TransferOutcome::Completed),
                Ok(ack) => {
                    warn!(msg_id = %job.id, status = ack.status, body = %ack.body, "upload rejected");
                    (TransferEvent::Failed, TransferOutcome::Failed)
                }
                Err(TransferError::Cancelled) => (TransferEvent::Cancel, TransferOutcome::Cancelled),
                Err(e) => {
                    error!(msg_id = %job.id, error = %e, "upload failed");
                    (TransferEvent::Failed, TransferOutcome::Failed)
                }
            };
            this.finish(job, event, None);
            outcome
        }))
    }

    /// Download the remote attachment of a message from the other
    /// participant into the media directory.
    pub fn start_download(&self, id: &MessageId) -> Result<JoinHandle<TransferOutcome>> {
        let (request, job) = {
            let mut s = lock(&self.state)?;
            let message = s.message(id).ok_or_else(|| ClientError::UnknownMessage(id.clone()))?;
            let attachment = message
                .attachment()
                .ok_or_else(|| ClientError::NotAnAttachment(id.clone()))?;
            let url = match &attachment.source {
                MediaSource::Remote(url) => url.clone(),
                MediaSource::Local(_) => return Err(ClientError::NoRemoteSource(id.clone())),
            };

            let request = DownloadRequest {
                url,
                destination: download_path(&self.settings.media_dir, id, attachment.file_name.as_deref()),
            };
            let size = attachment.size.clone();
            let job = self.begin(&mut s, id, Direction::Download, size)?;
            (request, job)
        };

        self.announce(&job);
        info!(msg_id = %id, url = %request.url, "download started");

        let backend = self.backend.clone();
        let this = self.clone();
        Ok(tokio::spawn(async move {
            let result = backend.download(request, job.cancel.clone(), job.progress.clone()).await;
            let (event, outcome, downloaded) = match result {
                Ok(Some(downloaded)) => (TransferEvent::Succeeded, TransferOutcome::Completed, Some(downloaded)),
                Ok(None) => {
                    debug!(msg_id = %job.id, "download stopped without result");
                    (TransferEvent::Interrupted, TransferOutcome::Cancelled, None)
                }
                Err(e) => {
                    error!(msg_id = %job.id, error = %e, "download failed");
                    (TransferEvent::Failed, TransferOutcome::Failed, None)
                }
            };
            this.finish(job, event, downloaded);
            outcome
        }))
    }

    /// Cancel the transfer of `id`.
    ///
    /// Only one cancellation runs at a time: while one is pending, further
    /// requests return `false` without touching anything. Otherwise the
    /// message moves to `cancel` at once, the task is signalled, and the
    /// call returns `true` after the task has stopped and left the active
    /// set.
    pub async fn cancel(&self, id: &MessageId) -> Result<bool> {
        let (handle, status) = {
            let mut s = lock(&self.state)?;
            if let Some(pending) = &s.pending_cancel {
                debug!(msg_id = %id, pending = %pending, "cancel ignored, another is pending");
                return Ok(false);
            }
            let Some(handle) = s.active.get(id).cloned() else {
                debug!(msg_id = %id, "cancel ignored, no active transfer");
                return Ok(false);
            };

            s.pending_cancel = Some(id.clone());
            let viewer = s.viewer.id.clone();
            let status = s
                .room
                .update(id, |m| m.apply(TransferEvent::Cancel, &viewer).ok())
                .flatten();
            (handle, status)
        };

        if let Some(status) = status {
            self.events.emit(ClientEvent::MessageUpdated { id: id.clone(), status });
        }

        handle.cancel.cancel();
        let mut done = handle.done.clone();
        // Err means the task is gone without reporting, which is as done as it gets.
        let _ = done.wait_for(|finished| *finished).await;

        let removed = {
            let mut s = lock(&self.state)?;
            let same_task = s.active.get(id).is_some_and(|h| h.task == handle.task);
            if same_task {
                s.active.remove(id);
                s.progress.remove(id);
            }
            s.pending_cancel = None;
            same_task
        };
        if removed {
            self.events.emit(ClientEvent::TransferFinished { id: id.clone() });
        }

        info!(msg_id = %id, direction = ?handle.direction, "transfer cancelled");
        Ok(true)
    }

    /// Admit a transfer into the active set and move the message to the
    /// matching in-flight status.
    fn begin(
        &self,
        s: &mut SessionState,
        id: &MessageId,
        direction: Direction,
        size: Option<String>,
    ) -> Result<Job> {
        if s.is_active(id) {
            return Err(ClientError::AlreadyActive(id.clone()));
        }

        let in_flight = match direction {
            Direction::Upload => TransferStatus::Uploading,
            Direction::Download => TransferStatus::Downloading,
        };
        let viewer = s.viewer.id.clone();
        let message = s.message(id).ok_or_else(|| ClientError::UnknownMessage(id.clone()))?;
        if message.status != in_flight {
            let next = message.status.apply(TransferEvent::Activate, message.ownership(&viewer))?;
            if next != in_flight {
                return Err(InvalidTransition {
                    from: message.status,
                    event: TransferEvent::Activate,
                }
                .into());
            }
        }
        s.room.update(id, |m| m.status = in_flight);

        let accumulator = ProgressAccumulator::new(id.clone(), size, self.settings.progress_interval);
        s.progress.insert(id.clone(), accumulator.initial());
        let accumulator = Arc::new(Mutex::new(accumulator));

        let cancel = CancelToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let task = NEXT_TASK.fetch_add(1, Ordering::Relaxed);
        s.active.insert(
            id.clone(),
            TransferHandle {
                task,
                direction,
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        Ok(Job {
            id: id.clone(),
            task,
            cancel,
            progress: self.progress_fn(id.clone(), accumulator.clone()),
            accumulator,
            done: done_tx,
        })
    }

    fn announce(&self, job: &Job) {
        let status = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.message(&job.id).map(|m| m.status));
        if let Some(status) = status {
            self.events.emit(ClientEvent::MessageUpdated {
                id: job.id.clone(),
                status,
            });
        }
    }

    fn progress_fn(&self, id: MessageId, accumulator: Arc<Mutex<ProgressAccumulator>>) -> ProgressFn {
        let state = self.state.clone();
        let events = self.events.clone();
        Arc::new(move |progress| {
            let entry = match accumulator.lock() {
                Ok(mut acc) => acc.record(progress, Instant::now()),
                Err(_) => None,
            };
            if let Some(entry) = entry {
                publish_progress(&state, &events, &id, entry);
            }
        })
    }

    /// Apply the terminal event, leave the active set, and wake any
    /// pending cancellation.
    fn finish(&self, job: Job, event: TransferEvent, downloaded: Option<Downloaded>) {
        let flushed = job.accumulator.lock().ok().and_then(|mut acc| acc.flush());
        if let Some(entry) = flushed {
            publish_progress(&self.state, &self.events, &job.id, entry);
        }

        let (status, left) = match self.state.lock() {
            Ok(mut s) => {
                let viewer = s.viewer.id.clone();
                let status = s
                    .room
                    .update(&job.id, |m| match m.apply(event, &viewer) {
                        Ok(status) => {
                            if let (TransferStatus::Available, Some(d)) = (status, &downloaded) {
                                if let Some(a) = m.body.attachment_mut() {
                                    a.source = MediaSource::Local(d.path.clone());
                                    if let Some(ct) = &d.content_type {
                                        a.mime_type = Some(ct.clone());
                                    }
                                }
                            }
                            Some(status)
                        }
                        Err(e) => {
                            // Usually a cancel that already moved the status.
                            debug!(msg_id = %m.id, error = %e, "terminal event not applied");
                            None
                        }
                    })
                    .flatten();

                let same_task = s.active.get(&job.id).is_some_and(|h| h.task == job.task);
                if same_task {
                    s.active.remove(&job.id);
                    s.progress.remove(&job.id);
                }
                (status, same_task)
            }
            Err(_) => {
                error!(msg_id = %job.id, "session state poisoned, transfer result dropped");
                (None, false)
            }
        };

        if let Some(status) = status {
            self.events.emit(ClientEvent::MessageUpdated {
                id: job.id.clone(),
                status,
            });
        }
        if left {
            self.events.emit(ClientEvent::TransferFinished { id: job.id.clone() });
        }
        let _ = job.done.send(true);
    }
}

fn publish_progress(state: &SharedState, events: &EventBus, id: &MessageId, entry: ProgressEntry) {
    let applied = match state.lock() {
        Ok(mut s) => match s.progress.get_mut(id) {
            Some(slot) => {
                *slot = entry.clone();
                true
            }
            // Entry already removed by a cancel or completion.
            None => false,
        },
        Err(_) => false,
    };
    if applied {
        events.emit(ClientEvent::TransferProgress(entry));
    }
}

/// Local path for a downloaded attachment. The short id prefix keeps two
/// attachments with the same name (every voice note is `voice`) apart.
pub fn download_path(media_dir: &Path, id: &MessageId, file_name: Option<&str>) -> PathBuf {
    let name = file_name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("attachment");
    media_dir.join(format!("{}-{}", file_prefix(id), name))
}

/// Short id prefix for files named after a message. Ids come from the
/// server, so anything but letters, digits, `-` and `_` is dropped.
pub fn file_prefix(id: &MessageId) -> String {
    id.short()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use duet_shared::{AttachmentKind, Participant};

    use super::*;
    use crate::testing::{coordinator_with, inbound_attachment, outbound_attachment, status_of, wait_until, Script};

    #[tokio::test]
    async fn upload_success_makes_available() {
        let (coord, state, fake) = coordinator_with(vec![Script::UploadAck("ok")], vec![]);
        let id = outbound_attachment(&state, AttachmentKind::Image);

        let outcome = coord.start_upload(&id).unwrap().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(status_of(&state, &id), TransferStatus::Available);
        assert_eq!(coord.active_count(), 0);
        assert!(state.lock().unwrap().progress.is_empty());

        let request = fake.last_upload().unwrap();
        assert_eq!(request.field_name, "file");
        assert_eq!(request.parameters, vec![("id".to_string(), id.to_string())]);
    }

    #[tokio::test]
    async fn non_ok_ack_is_an_error() {
        let (coord, state, _fake) = coordinator_with(vec![Script::UploadAck("quota exceeded")], vec![]);
        let id = outbound_attachment(&state, AttachmentKind::File);

        let outcome = coord.start_upload(&id).unwrap().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Failed);
        assert_eq!(status_of(&state, &id), TransferStatus::Error);
    }

    #[tokio::test]
    async fn failed_upload_retries_to_available_for_every_kind() {
        for kind in [AttachmentKind::Image, AttachmentKind::Video, AttachmentKind::Audio, AttachmentKind::File] {
            let (coord, state, _fake) =
                coordinator_with(vec![Script::UploadFail, Script::UploadAck("ok")], vec![]);
            let id = outbound_attachment(&state, kind);

            coord.start_upload(&id).unwrap().await.unwrap();
            assert_eq!(status_of(&state, &id), TransferStatus::Error, "{kind:?}");

            let retry = coord.start_upload(&id).unwrap();
            assert_eq!(status_of(&state, &id), TransferStatus::Uploading, "{kind:?}");
            assert_eq!(retry.await.unwrap(), TransferOutcome::Completed);
            assert_eq!(status_of(&state, &id), TransferStatus::Available, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn download_paths() {
        let (coord, state, _fake) = coordinator_with(
            vec![],
            vec![Script::DownloadOk(Some("video/mp4")), Script::DownloadNone, Script::DownloadFail],
        );
        let ok = inbound_attachment(&state, AttachmentKind::Video, "clip.mp4");
        let none = inbound_attachment(&state, AttachmentKind::Image, "a.jpeg");
        let fail = inbound_attachment(&state, AttachmentKind::File, "doc.pdf");

        assert_eq!(coord.start_download(&ok).unwrap().await.unwrap(), TransferOutcome::Completed);
        assert_eq!(coord.start_download(&none).unwrap().await.unwrap(), TransferOutcome::Cancelled);
        assert_eq!(coord.start_download(&fail).unwrap().await.unwrap(), TransferOutcome::Failed);

        assert_eq!(status_of(&state, &ok), TransferStatus::Available);
        assert_eq!(status_of(&state, &none), TransferStatus::Cancel);
        assert_eq!(status_of(&state, &fail), TransferStatus::Error);

        let s = state.lock().unwrap();
        let attachment = s.message(&ok).unwrap().attachment().unwrap().clone();
        assert!(attachment.source.is_local());
        assert_eq!(attachment.mime_type.as_deref(), Some("video/mp4"));
        assert!(s.active.is_empty());
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let (coord, state, _fake) = coordinator_with(vec![], vec![Script::Hang]);
        let id = inbound_attachment(&state, AttachmentKind::Image, "p.png");

        let task = coord.start_download(&id).unwrap();
        assert!(matches!(coord.start_download(&id), Err(ClientError::AlreadyActive(_))));
        assert_eq!(coord.active_count(), 1);

        assert!(coord.cancel(&id).await.unwrap());
        assert_eq!(task.await.unwrap(), TransferOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_then_download_again() {
        let (coord, state, _fake) = coordinator_with(vec![], vec![Script::Hang, Script::DownloadOk(None)]);
        let id = inbound_attachment(&state, AttachmentKind::Audio, "song.mp3");

        let task = coord.start_download(&id).unwrap();
        assert_eq!(status_of(&state, &id), TransferStatus::Downloading);

        assert!(coord.cancel(&id).await.unwrap());
        assert_eq!(status_of(&state, &id), TransferStatus::Cancel);
        assert_eq!(coord.active_count(), 0);
        task.await.unwrap();

        let again = coord.start_download(&id).unwrap();
        assert_eq!(status_of(&state, &id), TransferStatus::Downloading);
        assert_eq!(again.await.unwrap(), TransferOutcome::Completed);
        assert_eq!(status_of(&state, &id), TransferStatus::Available);
    }

    #[tokio::test]
    async fn cancel_upload_moves_to_cancel() {
        let (coord, state, _fake) = coordinator_with(vec![Script::Hang], vec![]);
        let id = outbound_attachment(&state, AttachmentKind::Video);

        let task = coord.start_upload(&id).unwrap();
        assert!(coord.cancel(&id).await.unwrap());
        assert_eq!(task.await.unwrap(), TransferOutcome::Cancelled);
        assert_eq!(status_of(&state, &id), TransferStatus::Cancel);
    }

    #[tokio::test]
    async fn second_cancel_while_pending_has_no_effect() {
        let (coord, state, fake) = coordinator_with(vec![], vec![Script::HangUntilReleased, Script::HangUntilReleased]);
        let first = inbound_attachment(&state, AttachmentKind::Image, "1.png");
        let second = inbound_attachment(&state, AttachmentKind::Image, "2.png");

        let t1 = coord.start_download(&first).unwrap();
        let t2 = coord.start_download(&second).unwrap();
        assert_eq!(coord.active_count(), 2);

        // First cancel stays pending until the fake backend releases it.
        let pending = {
            let coord = coord.clone();
            let first = first.clone();
            tokio::spawn(async move { coord.cancel(&first).await })
        };
        wait_until(|| state.lock().unwrap().pending_cancel.is_some()).await;

        assert!(!coord.cancel(&second).await.unwrap());
        assert_eq!(status_of(&state, &second), TransferStatus::Downloading);
        assert_eq!(coord.active_count(), 2);

        fake.release();
        assert!(pending.await.unwrap().unwrap());
        assert_eq!(coord.active_count(), 1);
        assert!(coord.is_active(&second));
        assert!(state.lock().unwrap().pending_cancel.is_none());

        t1.await.unwrap();
        fake.release();
        assert!(coord.cancel(&second).await.unwrap());
        t2.await.unwrap();
        assert_eq!(coord.active_count(), 0);
    }

    #[tokio::test]
    async fn cancel_without_active_transfer_is_noop() {
        let (coord, state, _fake) = coordinator_with(vec![], vec![]);
        let id = inbound_attachment(&state, AttachmentKind::Image, "x.png");
        assert!(!coord.cancel(&id).await.unwrap());
        assert_eq!(status_of(&state, &id), TransferStatus::Download);
    }

    #[tokio::test]
    async fn receiver_cannot_upload_and_text_has_no_transfer() {
        let (coord, state, _fake) = coordinator_with(vec![], vec![]);
        let inbound = inbound_attachment(&state, AttachmentKind::Image, "x.png");
        assert!(coord.start_upload(&inbound).is_err());

        let text = {
            let mut s = state.lock().unwrap();
            let msg = duet_shared::Message::text(Participant::new("me", "Me"), "hi");
            let id = msg.id.clone();
            s.room.prepend(msg);
            id
        };
        assert!(matches!(coord.start_upload(&text), Err(ClientError::NotAnAttachment(_))));
    }

    #[tokio::test]
    async fn progress_is_published_and_cleared() {
        let (coord, state, _fake) = coordinator_with(vec![Script::UploadAck("ok")], vec![]);
        let id = outbound_attachment(&state, AttachmentKind::File);
        let mut events = coord.events.subscribe();

        coord.start_upload(&id).unwrap().await.unwrap();

        let mut saw_progress = false;
        let mut saw_finished = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ClientEvent::TransferProgress(entry) => {
                    assert_eq!(entry.id, id);
                    saw_progress = true;
                }
                ClientEvent::TransferFinished { id: done } => {
                    assert_eq!(done, id);
                    saw_finished = true;
                }
                _ => {}
            }
        }
        assert!(saw_progress && saw_finished);
        assert!(state.lock().unwrap().progress.is_empty());
    }

    #[test]
    fn download_path_is_prefixed_and_flattened() {
        let id = MessageId::from("0123456789abcdef");
        let path = download_path(Path::new("/media"), &id, Some("../etc/voice"));
        assert_eq!(path, PathBuf::from("/media/01234567-voice"));
        assert_eq!(
            download_path(Path::new("/media"), &id, None),
            PathBuf::from("/media/01234567-attachment")
        );

        let hostile = MessageId::from("../../etc/passwd");
        let path = download_path(Path::new("/media"), &hostile, Some("x.png"));
        assert_eq!(path, PathBuf::from("/media/et-x.png"));
    }
}
