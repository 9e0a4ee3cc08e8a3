//! v001 -- Initial schema creation.
//!
//! Creates the `users` and `messages` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users: last known position per connection
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    socket_id  TEXT PRIMARY KEY NOT NULL,   -- connection UUID
    username   TEXT NOT NULL,
    latitude   REAL NOT NULL,
    longitude  REAL NOT NULL,
    last_seen  TEXT NOT NULL                -- RFC-3339, UTC, micros
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    sender_id   TEXT NOT NULL,              -- connection UUID
    sender_name TEXT NOT NULL,
    body        TEXT NOT NULL,
    latitude    REAL NOT NULL,
    longitude   REAL NOT NULL,
    timestamp   TEXT NOT NULL               -- RFC-3339, UTC, micros
);

CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(timestamp DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
