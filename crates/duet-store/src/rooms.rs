use chrono::{DateTime, Utc};
use rusqlite::params;

use duet_shared::{Message, Participant, Room, RoomId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::RoomSummary;

impl Database {
    /// Insert or replace the whole room document.
    pub fn put_room(&self, room: &Room) -> Result<()> {
        let users_json = serde_json::to_string(&room.users)?;
        let messages_json = serde_json::to_string(&room.messages)?;

        self.conn().execute(
            "INSERT INTO rooms (id, users_json, messages_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                users_json = excluded.users_json,
                messages_json = excluded.messages_json,
                updated_at = excluded.updated_at",
            params![room.id.as_str(), users_json, messages_json, Utc::now().to_rfc3339()],
        )?;

        tracing::debug!(room_id = %room.id, messages = room.messages.len(), "room saved");
        Ok(())
    }

    pub fn get_room(&self, id: &RoomId) -> Result<Room> {
        let (users_json, messages_json): (String, String) = self
            .conn()
            .query_row(
                "SELECT users_json, messages_json FROM rooms WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Room {
            id: id.clone(),
            users: serde_json::from_str(&users_json)?,
            messages: serde_json::from_str(&messages_json)?,
        })
    }

    /// `get_room`, mapping a missing room to `None`.
    pub fn find_room(&self, id: &RoomId) -> Result<Option<Room>> {
        match self.get_room(id) {
            Ok(room) => Ok(Some(room)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Rooms ordered by most recent change first.
    pub fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, users_json, messages_json, updated_at
             FROM rooms
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut rooms = Vec::new();
        for row in rows {
            let (id, users_json, messages_json, updated_str) = row?;
            rooms.push(to_summary(id, &users_json, &messages_json, &updated_str)?);
        }
        Ok(rooms)
    }
}

fn to_summary(id: String, users_json: &str, messages_json: &str, updated_str: &str) -> Result<RoomSummary> {
    let users: [Participant; 2] = serde_json::from_str(users_json)?;
    let messages: Vec<Message> = serde_json::from_str(messages_json)?;

    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(updated_str)?.with_timezone(&Utc);

    Ok(RoomSummary {
        id: RoomId(id),
        users,
        last_preview: messages.first().map(Message::preview_line),
        message_count: messages.len(),
        updated_at,
    })
}
