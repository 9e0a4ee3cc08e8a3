//! CRUD operations for [`User`] records.

use rusqlite::params;
use uuid::Uuid;

use crate::database::{decode_timestamp, encode_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::User;
use nearchat_shared::ConnectionId;

impl Database {
    /// Insert a user, or overwrite name, position and last-seen of an
    /// existing one.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (socket_id, username, latitude, longitude, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(socket_id) DO UPDATE SET
                 username  = excluded.username,
                 latitude  = excluded.latitude,
                 longitude = excluded.longitude,
                 last_seen = excluded.last_seen",
            params![
                user.socket_id.to_string(),
                user.username,
                user.latitude,
                user.longitude,
                encode_timestamp(&user.last_seen),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, socket_id: ConnectionId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT socket_id, username, latitude, longitude, last_seen
                 FROM users WHERE socket_id = ?1",
                params![socket_id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let last_seen_str: String = row.get(4)?;

    let socket_id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(User {
        socket_id: ConnectionId(socket_id),
        username: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        last_seen: decode_timestamp(4, &last_seen_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(id: ConnectionId, name: &str, lat: f64) -> User {
        User {
            socket_id: id,
            username: name.to_string(),
            latitude: lat,
            longitude: 127.0,
            last_seen: "2024-05-01T10:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let id = ConnectionId::new();

        db.upsert_user(&user(id, "mina", 37.0)).unwrap();
        let mut moved = user(id, "mina", 37.001);
        moved.last_seen = moved.last_seen + Duration::seconds(5);
        db.upsert_user(&moved).unwrap();

        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        let stored = db.get_user(id).unwrap();
        assert_eq!(stored.latitude, 37.001);
        assert_eq!(stored.last_seen, moved.last_seen);
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(ConnectionId::new()),
            Err(StoreError::NotFound)
        ));
    }
}
