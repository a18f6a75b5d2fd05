//! Resumable file-transfer primitive.
//!
//! The chat core never talks HTTP directly. It hands a [`FileTransfer`]
//! a request, a [`CancelToken`] and a progress callback, and reads the
//! outcome:
//!
//! * download: `Ok(Some(_))` finished, `Ok(None)` stopped without a result
//!   (cancelled or paused), `Err(_)` failed;
//! * upload: `Ok(ack)` with the server's body, `Err(Cancelled)` when the
//!   token fired, any other `Err(_)` failed.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::TransferError;

/// Byte counts reported while a transfer runs. `total` is 0 when the peer
/// did not announce a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Cooperative cancellation flag shared between the coordinator and a
/// running transfer. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|c| *c).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Final location. Bytes are staged in `<destination>.part` first.
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    /// `Content-Type` reported by the server, if any.
    pub content_type: Option<String>,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub url: String,
    pub source: PathBuf,
    /// Multipart field carrying the file.
    pub field_name: String,
    pub mime_type: Option<String>,
    /// Extra multipart text fields.
    pub parameters: Vec<(String, String)>,
}

/// What the upload endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAck {
    pub status: u16,
    pub body: String,
}

impl UploadAck {
    /// The endpoint acknowledges a stored upload with the literal body `ok`.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status) && self.body.trim() == duet_shared::constants::UPLOAD_ACK_OK
    }
}

pub trait FileTransfer: Send + Sync + 'static {
    fn download(
        &self,
        request: DownloadRequest,
        cancel: CancelToken,
        progress: ProgressFn,
    ) -> impl Future<Output = Result<Option<Downloaded>, TransferError>> + Send;

    fn upload(
        &self,
        request: UploadRequest,
        cancel: CancelToken,
        progress: ProgressFn,
    ) -> impl Future<Output = Result<UploadAck, TransferError>> + Send;
}
