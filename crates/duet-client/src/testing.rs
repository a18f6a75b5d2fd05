//! Scripted transfer backend and state fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use duet_net::{
    CancelToken, DownloadRequest, Downloaded, FileTransfer, ProgressFn, TransferError, TransferProgress,
    UploadAck, UploadRequest,
};
use duet_shared::{
    Attachment, AttachmentKind, Body, MediaSource, Message, MessageId, Participant, Room, RoomId,
    TransferStatus,
};

use crate::coordinator::{TransferCoordinator, TransferSettings};
use crate::events::EventBus;
use crate::state::{SessionState, SharedState};

/// What the fake backend does for one call, consumed in order per direction.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    UploadAck(&'static str),
    UploadFail,
    DownloadOk(Option<&'static str>),
    DownloadNone,
    DownloadFail,
    /// Run until cancelled.
    Hang,
    /// Run until cancelled, then until [`FakeTransfer::release`].
    HangUntilReleased,
}

#[derive(Default)]
pub(crate) struct FakeTransfer {
    uploads: Mutex<VecDeque<Script>>,
    downloads: Mutex<VecDeque<Script>>,
    upload_requests: Mutex<Vec<UploadRequest>>,
    released: Notify,
}

impl FakeTransfer {
    pub(crate) fn new(uploads: Vec<Script>, downloads: Vec<Script>) -> Self {
        Self {
            uploads: Mutex::new(uploads.into()),
            downloads: Mutex::new(downloads.into()),
            ..Default::default()
        }
    }

    pub(crate) fn release(&self) {
        self.released.notify_one();
    }

    pub(crate) fn last_upload(&self) -> Option<UploadRequest> {
        self.upload_requests.lock().unwrap().last().cloned()
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.upload_requests.lock().unwrap().len()
    }

    /// Report some progress, then hold until the script says to stop.
    /// Returns `true` when the call ended by cancellation.
    async fn run(&self, script: Script, cancel: &CancelToken, progress: &ProgressFn) -> bool {
        progress(TransferProgress { transferred: 512, total: 1024 });
        progress(TransferProgress { transferred: 1024, total: 1024 });
        match script {
            Script::Hang => {
                cancel.cancelled().await;
                true
            }
            Script::HangUntilReleased => {
                cancel.cancelled().await;
                self.released.notified().await;
                true
            }
            _ => false,
        }
    }
}

impl FileTransfer for FakeTransfer {
    async fn download(
        &self,
        request: DownloadRequest,
        cancel: CancelToken,
        progress: ProgressFn,
    ) -> Result<Option<Downloaded>, TransferError> {
        let script = self.downloads.lock().unwrap().pop_front().unwrap_or(Script::DownloadOk(None));
        if self.run(script, &cancel, &progress).await {
            return Ok(None);
        }
        match script {
            Script::DownloadOk(content_type) => Ok(Some(Downloaded {
                path: request.destination,
                content_type: content_type.map(str::to_string),
                bytes: 1024,
            })),
            Script::DownloadNone => Ok(None),
            _ => Err(TransferError::Status(500)),
        }
    }

    async fn upload(
        &self,
        request: UploadRequest,
        cancel: CancelToken,
        progress: ProgressFn,
    ) -> Result<UploadAck, TransferError> {
        self.upload_requests.lock().unwrap().push(request);
        let script = self.uploads.lock().unwrap().pop_front().unwrap_or(Script::UploadAck("ok"));
        if self.run(script, &cancel, &progress).await {
            return Err(TransferError::Cancelled);
        }
        match script {
            Script::UploadAck(body) => Ok(UploadAck {
                status: 200,
                body: body.to_string(),
            }),
            _ => Err(TransferError::Status(502)),
        }
    }
}

pub(crate) fn me() -> Participant {
    Participant::new("me", "Me")
}

pub(crate) fn them() -> Participant {
    Participant::new("them", "Them")
}

pub(crate) fn shared_state() -> SharedState {
    let room = Room::new(RoomId::new("room-1"), me(), them());
    Arc::new(Mutex::new(SessionState::new(me(), room)))
}

pub(crate) fn settings() -> TransferSettings {
    TransferSettings {
        upload_url: "http://127.0.0.1:3000/upload".into(),
        media_dir: std::env::temp_dir().join("duet-test-media"),
        progress_interval: Duration::from_millis(700),
    }
}

pub(crate) fn coordinator_with(
    uploads: Vec<Script>,
    downloads: Vec<Script>,
) -> (TransferCoordinator<FakeTransfer>, SharedState, Arc<FakeTransfer>) {
    let fake = Arc::new(FakeTransfer::new(uploads, downloads));
    let state = shared_state();
    let coord = TransferCoordinator::new(fake.clone(), state.clone(), EventBus::default(), settings());
    (coord, state, fake)
}

/// Own attachment message with a local file, status `uploading`.
pub(crate) fn outbound_attachment(state: &SharedState, kind: AttachmentKind) -> MessageId {
    let mut attachment = Attachment::new(MediaSource::Local(PathBuf::from("/tmp/duet-outbound.bin")));
    attachment.size = Some("1.0 KB".into());
    let message = Message::outbound(me(), Body::from_kind(kind, attachment), "");
    let id = message.id.clone();
    state.lock().unwrap().room.prepend(message);
    id
}

/// Attachment reference from the other participant, status `download`.
pub(crate) fn inbound_attachment(state: &SharedState, kind: AttachmentKind, file_name: &str) -> MessageId {
    let mut attachment = Attachment::new(MediaSource::Remote(format!("http://127.0.0.1:3000/uploads/{file_name}")));
    attachment.file_name = Some(file_name.to_string());
    let mut message = Message::outbound(them(), Body::from_kind(kind, attachment), "");
    message.status = TransferStatus::INBOUND;
    let id = message.id.clone();
    state.lock().unwrap().room.prepend(message);
    id
}

pub(crate) fn status_of(state: &SharedState, id: &MessageId) -> TransferStatus {
    state.lock().unwrap().message(id).unwrap().status
}

pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
