use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use duet_shared::MessageId;

use crate::database::Database;
use crate::error::Result;
use crate::models::Blob;

impl Database {
    /// Record the local file behind an attachment message. A message has at
    /// most one file, so a second record replaces the first.
    pub fn insert_blob(&self, blob: &Blob) -> Result<()> {
        self.conn().execute(
            "INSERT INTO blobs
                (message_id, file_name, file_size, blake3_hash, is_uploaded, local_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(message_id) DO UPDATE SET
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                blake3_hash = excluded.blake3_hash,
                is_uploaded = excluded.is_uploaded,
                local_path = excluded.local_path",
            params![
                blob.message_id.as_str(),
                blob.file_name,
                blob.file_size,
                blob.blake3_hash,
                blob.is_uploaded,
                blob.local_path,
                blob.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_blob(&self, message_id: &MessageId) -> Result<Option<Blob>> {
        let blob = self
            .conn()
            .query_row(
                "SELECT file_name, file_size, blake3_hash, is_uploaded, local_path, created_at
                 FROM blobs WHERE message_id = ?1",
                params![message_id.as_str()],
                |row| blob_from_row(message_id, row),
            )
            .optional()?;
        Ok(blob)
    }

    /// Flag the file of `message_id` as held by the server. `false` when no
    /// file is recorded for the message.
    pub fn mark_uploaded(&self, message_id: &MessageId) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE blobs SET is_uploaded = 1 WHERE message_id = ?1",
            params![message_id.as_str()],
        )?;
        Ok(changed == 1)
    }
}

fn blob_from_row(message_id: &MessageId, row: &Row<'_>) -> rusqlite::Result<Blob> {
    let created: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(Blob {
        message_id: message_id.clone(),
        file_name: row.get(0)?,
        file_size: row.get(1)?,
        blake3_hash: row.get(2)?,
        is_uploaded: row.get(3)?,
        local_path: row.get(4)?,
        created_at,
    })
}
