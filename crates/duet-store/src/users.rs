use chrono::{DateTime, Utc};
use rusqlite::params;

use duet_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, avatar, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                avatar = excluded.avatar,
                updated_at = excluded.updated_at",
            params![user.id.as_str(), user.name, user.avatar, user.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, avatar, updated_at FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;
    let updated_str: String = row.get(3)?;

    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(User {
        id: UserId(id),
        name,
        avatar,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use duet_shared::Participant;

    use super::*;

    #[test]
    fn upsert_updates_name() {
        let db = Database::open_in_memory().unwrap();
        let mut user = User::from(&Participant::new("u1", "Sara"));
        db.upsert_user(&user).unwrap();

        user.name = "Sara K.".into();
        user.avatar = Some("https://x/a.png".into());
        db.upsert_user(&user).unwrap();

        let loaded = db.get_user(&user.id).unwrap();
        assert_eq!(loaded.name, "Sara K.");
        assert_eq!(loaded.avatar.as_deref(), Some("https://x/a.png"));
    }

    #[test]
    fn unknown_user_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user(&UserId::new("x")), Err(StoreError::NotFound)));
    }
}
