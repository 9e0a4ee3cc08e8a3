//! Domain model structs persisted in the relay database.

use chrono::{DateTime, Utc};
use nearchat_shared::ConnectionId;
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Last known state of a connection, upserted on join and on every move.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub socket_id: ConnectionId,
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A relayed chat message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    pub sender_id: ConnectionId,
    pub sender_name: String,
    pub body: String,
    /// Sender position at send time.
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}
