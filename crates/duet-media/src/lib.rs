//! # duet-media
//!
//! Local media inspection for attachments: audio tags and embedded artwork,
//! artwork persistence next to the media directory, and duration probing.

pub mod artwork;
pub mod error;
pub mod metadata;
pub mod probe;

pub use artwork::{persist_artwork, persist_preview, ArtworkFormat};
pub use error::MediaError;
pub use metadata::{extract_audio_metadata, AudioMetadata};
pub use probe::{LoftyProbe, MediaProbe};
