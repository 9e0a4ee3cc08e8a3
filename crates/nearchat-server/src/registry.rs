use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use nearchat_shared::{ConnectionId, Position};

use crate::error::RelayError;

/// One live, registered connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: ConnectionId,
    pub name: String,
    pub position: Option<Position>,
    pub last_seen: DateTime<Utc>,
}

/// Every registered connection, keyed by identity.
///
/// A single lock guards the map. Writers replace a whole [`Entry`] (or its
/// position as one `Position` value), so a snapshot can never observe a
/// latitude without its longitude.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`.
    pub async fn register(
        &self,
        id: ConnectionId,
        name: impl Into<String>,
        lat: f64,
        lon: f64,
    ) -> Result<Entry, RelayError> {
        let position = Position::new(lat, lon)?;
        let entry = Entry {
            id,
            name: name.into(),
            position: Some(position),
            last_seen: Utc::now(),
        };

        let replaced = self
            .entries
            .write()
            .await
            .insert(id, entry.clone())
            .is_some();

        debug!(conn = %id, replaced, "Registry entry stored");
        Ok(entry)
    }

    /// Move an existing entry. Returns the updated entry.
    pub async fn update_position(
        &self,
        id: ConnectionId,
        lat: f64,
        lon: f64,
    ) -> Result<Entry, RelayError> {
        let position = Position::new(lat, lon)?;

        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?;
        entry.position = Some(position);
        entry.last_seen = Utc::now();
        Ok(entry.clone())
    }

    /// Remove `id`, returning what was stored. Removing an unknown identity
    /// is not an error.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Entry> {
        self.entries.write().await.remove(id)
    }

    pub async fn get(&self, id: &ConnectionId) -> Option<Entry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Point-in-time copy of all entries.
    pub async fn snapshot(&self) -> Vec<Entry> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
