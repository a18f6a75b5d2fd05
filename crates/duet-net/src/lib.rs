// Network collaborators of the chat core: the resumable file-transfer
// primitive and its HTTP backend, the connectivity probe, and the outbound
// side of the messaging channel.

pub mod channel;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod transfer;

pub use channel::{ChannelSender, MessageChannel};
pub use connectivity::{spawn_probe, Connectivity, OfflineReason};
pub use error::{ChannelError, TransferError};
pub use http::HttpTransfer;
pub use transfer::{
    CancelToken, DownloadRequest, Downloaded, FileTransfer, ProgressFn, TransferProgress, UploadAck,
    UploadRequest,
};
