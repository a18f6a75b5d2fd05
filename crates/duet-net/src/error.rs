use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a status the transfer cannot use.
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Transfer cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Messaging channel closed")]
    Closed,
}
