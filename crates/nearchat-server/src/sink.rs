//! Persistence sink: where users and messages go after they are relayed.
//!
//! The relay never waits on storage. Writes are queued on a bounded channel
//! and applied by one background worker on the blocking pool. When the
//! queue is full the newest job is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use nearchat_shared::constants::RECENT_MESSAGE_LIMIT;
use nearchat_shared::protocol::ChatMessage;
use nearchat_shared::Position;
use nearchat_store::{Database, Message, User};

use crate::error::SinkError;
use crate::proximity::within_radius;

/// Storage backend for relayed traffic. Methods block; callers run them on
/// the blocking pool.
pub trait PersistenceSink: Send + Sync + 'static {
    fn save_user(&self, user: &User) -> Result<(), SinkError>;

    fn save_message(&self, message: &ChatMessage) -> Result<(), SinkError>;

    /// Messages sent within the last `within` from no further than
    /// `radius_m` meters of `near`, newest first.
    fn recent_messages(
        &self,
        within: Duration,
        near: &Position,
        radius_m: f64,
    ) -> Result<Vec<ChatMessage>, SinkError>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct StoreSink {
    db: Mutex<Database>,
}

impl StoreSink {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T, SinkError>) -> Result<T, SinkError> {
        let db = self.db.lock().map_err(|_| SinkError::Poisoned)?;
        f(&db)
    }
}

impl PersistenceSink for StoreSink {
    fn save_user(&self, user: &User) -> Result<(), SinkError> {
        self.with_db(|db| Ok(db.upsert_user(user)?))
    }

    fn save_message(&self, message: &ChatMessage) -> Result<(), SinkError> {
        let record = Message {
            id: Uuid::new_v4(),
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            body: message.message.clone(),
            latitude: message.latitude,
            longitude: message.longitude,
            timestamp: message.timestamp,
        };
        self.with_db(|db| Ok(db.insert_message(&record)?))
    }

    fn recent_messages(
        &self,
        within: Duration,
        near: &Position,
        radius_m: f64,
    ) -> Result<Vec<ChatMessage>, SinkError> {
        let since = chrono::Duration::from_std(within)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or(SinkError::Window(within))?;
        let rows = self.with_db(|db| Ok(db.recent_messages(since, RECENT_MESSAGE_LIMIT)?))?;

        Ok(rows
            .into_iter()
            .map(|m| ChatMessage {
                sender_id: m.sender_id,
                sender_name: m.sender_name,
                message: m.body,
                latitude: m.latitude,
                longitude: m.longitude,
                timestamp: m.timestamp,
            })
            .filter(|m| within_radius(m.distance_to(near), radius_m))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Disabled persistence
// ---------------------------------------------------------------------------

/// Used when persistence is switched off or the database cannot be opened.
/// The relay keeps working; nothing is remembered.
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn save_user(&self, _user: &User) -> Result<(), SinkError> {
        Ok(())
    }

    fn save_message(&self, _message: &ChatMessage) -> Result<(), SinkError> {
        Ok(())
    }

    fn recent_messages(
        &self,
        _within: Duration,
        _near: &Position,
        _radius_m: f64,
    ) -> Result<Vec<ChatMessage>, SinkError> {
        Ok(Vec::new())
    }
}

/// Run [`PersistenceSink::recent_messages`] on the blocking pool.
pub async fn fetch_recent(
    sink: Arc<dyn PersistenceSink>,
    within: Duration,
    near: Position,
    radius_m: f64,
) -> Result<Vec<ChatMessage>, SinkError> {
    tokio::task::spawn_blocking(move || sink.recent_messages(within, &near, radius_m))
        .await
        .map_err(|e| SinkError::Join(e.to_string()))?
}

// ---------------------------------------------------------------------------
// Write queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SinkJob {
    SaveUser(User),
    SaveMessage(ChatMessage),
}

impl SinkJob {
    fn apply(&self, sink: &dyn PersistenceSink) -> Result<(), SinkError> {
        match self {
            SinkJob::SaveUser(user) => sink.save_user(user),
            SinkJob::SaveMessage(message) => sink.save_message(message),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SinkJob::SaveUser(_) => "save_user",
            SinkJob::SaveMessage(_) => "save_message",
        }
    }
}

/// Fire-and-forget handle onto the persistence queue.
#[derive(Clone)]
pub struct SinkWriter {
    tx: mpsc::Sender<SinkJob>,
    dropped: Arc<AtomicU64>,
}

impl SinkWriter {
    /// Start the background worker draining into `sink`.
    pub fn spawn(sink: Arc<dyn PersistenceSink>, capacity: usize) -> Self {
        let (writer, rx) = Self::with_queue(capacity);
        tokio::spawn(run_worker(sink, rx));
        writer
    }

    fn with_queue(capacity: usize) -> (Self, mpsc::Receiver<SinkJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (writer, rx)
    }

    pub fn save_user(&self, user: User) {
        self.enqueue(SinkJob::SaveUser(user));
    }

    pub fn save_message(&self, message: ChatMessage) {
        self.enqueue(SinkJob::SaveMessage(message));
    }

    /// Jobs discarded because the queue was full or the worker had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, job: SinkJob) {
        if let Err(e) = self.tx.try_send(job) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let (job, reason) = match e {
                mpsc::error::TrySendError::Full(job) => (job, "queue full"),
                mpsc::error::TrySendError::Closed(job) => (job, "worker stopped"),
            };
            warn!(job = job.kind(), reason, dropped_total = total, "Dropping persistence job");
        }
    }
}

async fn run_worker(sink: Arc<dyn PersistenceSink>, mut rx: mpsc::Receiver<SinkJob>) {
    while let Some(job) = rx.recv().await {
        let sink = sink.clone();
        let kind = job.kind();
        match tokio::task::spawn_blocking(move || job.apply(sink.as_ref())).await {
            Ok(Ok(())) => debug!(job = kind, "Persisted"),
            Ok(Err(e)) => warn!(job = kind, error = %e, "Persistence write failed"),
            Err(e) => error!(job = kind, error = %e, "Persistence task panicked"),
        }
    }
    debug!("Persistence worker stopped");
}


#[cfg(test)]
mod tests {
    use super::testing::{eventually, MemorySink};
    use super::*;
    use nearchat_shared::ConnectionId;

    fn message(text: &str, lat: f64, lon: f64) -> ChatMessage {
        ChatMessage::new(
            ConnectionId::new(),
            "mina".into(),
            text.into(),
            Position::new(lat, lon).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_queue_drops_newest_when_full() {
        let (writer, mut rx) = SinkWriter::with_queue(2);

        writer.save_message(message("one", 0.0, 0.0));
        writer.save_message(message("two", 0.0, 0.0));
        writer.save_message(message("three", 0.0, 0.0));
        assert_eq!(writer.dropped(), 1);

        let mut kept = Vec::new();
        while let Ok(SinkJob::SaveMessage(m)) = rx.try_recv() {
            kept.push(m.message);
        }
        assert_eq!(kept, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_closed_queue_counts_drop() {
        let (writer, rx) = SinkWriter::with_queue(4);
        drop(rx);
        writer.save_message(message("lost", 0.0, 0.0));
        assert_eq!(writer.dropped(), 1);
    }

    #[tokio::test]
    async fn test_worker_applies_jobs() {
        let sink = Arc::new(MemorySink::default());
        let writer = SinkWriter::spawn(sink.clone(), 16);

        writer.save_message(message("hello", 0.0, 0.0));
        writer.save_user(User {
            socket_id: ConnectionId::new(),
            username: "mina".into(),
            latitude: 0.0,
            longitude: 0.0,
            last_seen: Utc::now(),
        });

        assert!(eventually(|| sink.message_count() == 1 && sink.user_count() == 1).await);
    }

    #[tokio::test]
    async fn test_worker_survives_failures() {
        let sink = Arc::new(MemorySink::failing());
        let writer = SinkWriter::spawn(sink.clone(), 16);

        writer.save_message(message("a", 0.0, 0.0));
        writer.save_message(message("b", 0.0, 0.0));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Failures are logged, not counted as queue drops.
        assert_eq!(writer.dropped(), 0);
        assert!(!writer.tx.is_closed());
    }

    #[test]
    fn test_store_sink_filters_by_distance() {
        let sink = StoreSink::new(Database::open_in_memory().unwrap());
        sink.save_message(&message("close", 0.0, 0.0001)).unwrap();
        sink.save_message(&message("far", 0.0, 0.01)).unwrap();

        let origin = Position::new(0.0, 0.0).unwrap();
        let found = sink
            .recent_messages(Duration::from_secs(3600), &origin, 30.0)
            .unwrap();
        let texts: Vec<_> = found.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["close"]);
    }

    #[test]
    fn test_store_sink_upserts_users() {
        let sink = StoreSink::new(Database::open_in_memory().unwrap());
        let id = ConnectionId::new();
        let mut user = User {
            socket_id: id,
            username: "mina".into(),
            latitude: 1.0,
            longitude: 1.0,
            last_seen: Utc::now(),
        };
        sink.save_user(&user).unwrap();
        user.latitude = 2.0;
        sink.save_user(&user).unwrap();

        let stored = sink.with_db(|db| Ok(db.get_user(id)?)).unwrap();
        assert_eq!(stored.latitude, 2.0);
    }

    #[test]
    fn test_store_sink_rejects_unrepresentable_window() {
        let sink = StoreSink::new(Database::open_in_memory().unwrap());
        let origin = Position::new(0.0, 0.0).unwrap();
        let result = sink.recent_messages(Duration::MAX, &origin, 30.0);
        assert!(matches!(result, Err(SinkError::Window(_))));
    }

    #[test]
    fn test_store_sink_on_disk_replays_identical_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        let sent = message("persisted", 0.0, 0.0);

        {
            let sink = StoreSink::new(Database::open_at(&path).unwrap());
            sink.save_message(&sent).unwrap();
        }

        let sink = StoreSink::new(Database::open_at(&path).unwrap());
        let origin = Position::new(0.0, 0.0).unwrap();
        let found = sink
            .recent_messages(Duration::from_secs(3600), &origin, 30.0)
            .unwrap();
        assert_eq!(found, vec![sent]);
    }

    #[tokio::test]
    async fn test_fetch_recent_runs_off_thread() {
        let sink: Arc<dyn PersistenceSink> = Arc::new(NullSink);
        let origin = Position::new(0.0, 0.0).unwrap();
        let found = fetch_recent(sink, Duration::from_secs(60), origin, 30.0)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
