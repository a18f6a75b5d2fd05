//! Picture persistence.
//!
//! Embedded artwork and inbound previews travel either as raw picture bytes
//! or as base64 (optionally a `data:image/<type>;base64,` URI). They are
//! written once under the media directory and the message keeps the path:
//! `<file name>-artwork.<ext>` for artwork, `<stem>-preview.<ext>` for
//! previews.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ArtworkFormat {
    /// Detect the format from magic bytes. Unknown data is treated as JPEG,
    /// the format tag writers use most.
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Self::Png,
            [b'G', b'I', b'F', b'8', ..] => Self::Gif,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Self::Webp,
            _ => Self::Jpeg,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// Strip a `data:image/...;base64,` prefix and decode the payload. Bare
/// base64 without a prefix is accepted too.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, MediaError> {
    let payload = match uri.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| MediaError::InvalidArtwork("data URI without payload".into()))?;
            if !header.starts_with("image/") || !header.ends_with(";base64") {
                return Err(MediaError::InvalidArtwork(format!("unsupported data URI header: {header}")));
            }
            data
        }
        None => uri,
    };

    BASE64
        .decode(payload.trim())
        .map_err(|e| MediaError::InvalidArtwork(e.to_string()))
}

/// Write artwork bytes for the media file `file_name` into `dir`.
pub async fn persist_artwork(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, MediaError> {
    save_picture(dir, &format!("{file_name}-artwork"), bytes).await
}

/// Decode a base64 image preview or video thumbnail and write it into
/// `dir` as `<stem>-preview.<ext>`.
pub async fn persist_preview(dir: &Path, stem: &str, encoded: &str) -> Result<PathBuf, MediaError> {
    let bytes = decode_data_uri(encoded)?;
    save_picture(dir, &format!("{stem}-preview"), &bytes).await
}

async fn save_picture(dir: &Path, stem: &str, bytes: &[u8]) -> Result<PathBuf, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::InvalidArtwork("empty picture".into()));
    }

    let format = ArtworkFormat::sniff(bytes);
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{stem}.{}", format.extension()));
    tokio::fs::write(&path, bytes).await?;

    debug!(path = %path.display(), format = ?format, size = bytes.len(), "picture saved");
    Ok(path)
}
