use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::MUSIC_EXTENSIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

impl AttachmentKind {
    /// Name of the channel event announcing an attachment of this kind.
    pub fn send_event(self) -> &'static str {
        match self {
            Self::Image => "sendImage",
            Self::Video => "sendVideo",
            Self::Audio => "sendAudio",
            Self::File => "sendFile",
        }
    }

    /// Short label used for room previews ("New Image", ...).
    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Audio => "Music",
            Self::File => "File",
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".heic", ".bmp"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".m4v", ".webm", ".mkv", ".3gp", ".avi"];

pub fn is_music_file(file_name: &str) -> bool {
    has_extension(file_name, MUSIC_EXTENSIONS)
}

fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    let lower = file_name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// Classify a local file for sending. The MIME type wins when it names a
/// media family; the file name extension decides otherwise.
pub fn classify(file_name: Option<&str>, mime_type: Option<&str>) -> AttachmentKind {
    if let Some(mime) = mime_type {
        let family = mime.split('/').next().unwrap_or_default().trim().to_lowercase();
        match family.as_str() {
            "image" => return AttachmentKind::Image,
            "video" => return AttachmentKind::Video,
            "audio" => return AttachmentKind::Audio,
            _ => {}
        }
    }

    let Some(name) = file_name else {
        return AttachmentKind::File;
    };

    if is_music_file(name) {
        AttachmentKind::Audio
    } else if has_extension(name, IMAGE_EXTENSIONS) {
        AttachmentKind::Image
    } else if has_extension(name, VIDEO_EXTENSIONS) {
        AttachmentKind::Video
    } else {
        AttachmentKind::File
    }
}

/// Convenience wrapper classifying by a path's final component.
pub fn classify_path(path: &Path, mime_type: Option<&str>) -> AttachmentKind {
    let name = path.file_name().and_then(|n| n.to_str());
    classify(name, mime_type)
}
