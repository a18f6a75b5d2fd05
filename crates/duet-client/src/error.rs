use thiserror::Error;

use duet_media::MediaError;
use duet_net::{ChannelError, TransferError};
use duet_shared::{CryptoError, InvalidTransition, MessageId};
use duet_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Transfer state error: {0}")]
    Transition(#[from] InvalidTransition),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown message {0}")]
    UnknownMessage(MessageId),

    /// A transfer for this message is already running.
    #[error("Transfer already active for message {0}")]
    AlreadyActive(MessageId),

    #[error("Message {0} has no attachment")]
    NotAnAttachment(MessageId),

    #[error("Message {0} has no local file to upload")]
    NoLocalFile(MessageId),

    #[error("Message {0} has no remote source to download")]
    NoRemoteSource(MessageId),

    #[error("Session state lock poisoned")]
    LockPoisoned,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
