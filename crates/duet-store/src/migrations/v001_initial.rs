//! v001 -- Initial schema: `rooms`, `users`, `blobs`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms: participants and the full message list, newest first
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id            TEXT PRIMARY KEY NOT NULL,   -- server room id
    users_json    TEXT NOT NULL,               -- [Participant; 2]
    messages_json TEXT NOT NULL,               -- Vec<Message>
    updated_at    TEXT NOT NULL                -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_rooms_updated_at ON rooms(updated_at DESC);

-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    avatar     TEXT,
    updated_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Blobs: files this device holds for attachment messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blobs (
    message_id  TEXT PRIMARY KEY NOT NULL,
    file_name   TEXT NOT NULL,
    file_size   INTEGER NOT NULL,
    blake3_hash TEXT NOT NULL,
    is_uploaded INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    local_path  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
