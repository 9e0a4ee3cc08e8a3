use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::{decode_timestamp, encode_timestamp, Database};
use crate::error::Result;
use crate::models::Message;
use nearchat_shared::ConnectionId;

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, sender_name, body, latitude, longitude, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.sender_name,
                message.body,
                message.latitude,
                message.longitude,
                encode_timestamp(&message.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Messages newer than `since`, newest first, at most `limit` rows.
    pub fn recent_messages(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, sender_name, body, latitude, longitude, timestamp
             FROM messages
             WHERE timestamp > ?1
             ORDER BY timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![encode_timestamp(&since), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let ts_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = Uuid::parse_str(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id,
        sender_id: ConnectionId(sender_id),
        sender_name: row.get(2)?,
        body: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        timestamp: decode_timestamp(6, &ts_str)?,
    })
}
