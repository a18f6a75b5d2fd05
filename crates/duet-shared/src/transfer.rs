//! Attachment transfer lifecycle.
//!
//! Every attachment message carries a [`TransferStatus`]. The status only
//! moves through [`TransferStatus::apply`], and the UI picks its control from
//! [`affordance`], which is the same for every attachment kind: the sender of
//! a message only ever uploads it, the other participant only ever downloads
//! it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Attachment is on the device and usable.
    Available,
    /// Known on the server, not fetched yet.
    Download,
    Downloading,
    Uploading,
    /// Last attempt failed; retry is a manual action.
    Error,
    /// Aborted by the user; can be offered again.
    Cancel,
}

/// Whether the viewing user sent the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    Own,
    Other,
}

impl Ownership {
    pub fn of(is_sender: bool) -> Self {
        if is_sender {
            Self::Own
        } else {
            Self::Other
        }
    }
}

/// Direction of a transfer between device and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// User tapped the attachment control (download, retry, re-offer).
    Activate,
    Succeeded,
    Failed,
    /// The resumable operation finished without a result.
    Interrupted,
    /// User aborted an in-flight transfer.
    Cancel,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event {event:?} is not valid in state {from:?}")]
pub struct InvalidTransition {
    pub from: TransferStatus,
    pub event: TransferEvent,
}

impl TransferStatus {
    /// Status of an attachment this client is about to send.
    pub const OUTBOUND: Self = Self::Uploading;

    /// Status of an attachment reference received from the channel.
    pub const INBOUND: Self = Self::Download;

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading)
    }

    /// Transfer direction a user action starts from this state, if any.
    pub fn activation(self, ownership: Ownership) -> Option<Direction> {
        match (self, ownership) {
            (Self::Download, _) => Some(Direction::Download),
            (Self::Error | Self::Cancel, Ownership::Own) => Some(Direction::Upload),
            (Self::Error | Self::Cancel, Ownership::Other) => Some(Direction::Download),
            _ => None,
        }
    }

    pub fn apply(self, event: TransferEvent, ownership: Ownership) -> Result<Self, InvalidTransition> {
        use TransferEvent::*;

        let next = match (self, event) {
            (_, Activate) => match self.activation(ownership) {
                Some(Direction::Upload) => Some(Self::Uploading),
                Some(Direction::Download) => Some(Self::Downloading),
                None => None,
            },
            (Self::Uploading | Self::Downloading, Succeeded) => Some(Self::Available),
            (Self::Uploading | Self::Downloading, Failed) => Some(Self::Error),
            (Self::Uploading | Self::Downloading, Interrupted | Cancel) => Some(Self::Cancel),
            _ => None,
        };

        next.ok_or(InvalidTransition { from: self, event })
    }
}

/// Control the UI shows for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Affordance {
    Open,
    Download,
    Upload,
    CancelDownload,
    CancelUpload,
    RetryDownload,
    RetryUpload,
}

pub fn affordance(status: TransferStatus, ownership: Ownership) -> Affordance {
    match (status, ownership) {
        (TransferStatus::Available, _) => Affordance::Open,
        (TransferStatus::Download, _) => Affordance::Download,
        (TransferStatus::Downloading, _) => Affordance::CancelDownload,
        (TransferStatus::Uploading, _) => Affordance::CancelUpload,
        (TransferStatus::Error, Ownership::Own) => Affordance::RetryUpload,
        (TransferStatus::Error, Ownership::Other) => Affordance::RetryDownload,
        (TransferStatus::Cancel, Ownership::Own) => Affordance::Upload,
        (TransferStatus::Cancel, Ownership::Other) => Affordance::Download,
    }
}
