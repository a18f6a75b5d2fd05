use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Tag read error: {0}")]
    Tag(#[from] lofty::error::LoftyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid artwork: {0}")]
    InvalidArtwork(String),

    #[error("Media task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
