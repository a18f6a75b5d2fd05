//! Records persisted in the local database besides the room documents.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use duet_shared::{MessageId, Participant, RoomId, UserId};

/// A user this device has exchanged messages with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    /// Last time the profile was refreshed locally.
    pub updated_at: DateTime<Utc>,
}

impl From<&Participant> for User {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            avatar: p.avatar.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Room list entry: enough to render a conversation row without loading
/// every message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub users: [Participant; 2],
    pub last_preview: Option<String>,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// A file on this device backing an attachment message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blob {
    pub message_id: MessageId,
    pub file_name: String,
    /// File size in bytes.
    pub file_size: i64,
    /// BLAKE3 content hash (hex string).
    pub blake3_hash: String,
    /// Whether the server holds this file: uploaded from here and
    /// acknowledged, or downloaded from it.
    pub is_uploaded: bool,
    pub local_path: String,
    pub created_at: DateTime<Utc>,
}

impl Blob {
    /// Hash the file at `path` and build its record.
    pub fn from_file(message_id: MessageId, path: &Path, is_uploaded: bool) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut file = std::fs::File::open(path)?;
        let file_size = std::io::copy(&mut file, &mut hasher)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            message_id,
            file_name,
            file_size: file_size as i64,
            blake3_hash: hasher.finalize().to_hex().to_string(),
            is_uploaded,
            local_path: path.display().to_string(),
            created_at: Utc::now(),
        })
    }
}
