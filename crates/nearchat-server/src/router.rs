//! Event router: drives each connection through
//! `Unregistered -> Active -> Closed` and decides who hears about what.
//!
//! Every transition recomputes the nearby set from a fresh registry
//! snapshot. Pushes go through the [`Outbox`] and never block; persistence
//! goes through the [`SinkWriter`] queue and is never awaited.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nearchat_shared::constants::RECENT_MESSAGE_WINDOW_SECS;
use nearchat_shared::protocol::{
    ChatMessage, ClientEvent, LocationUpdate, NearbyUser, RegisterRequest, ServerEvent,
    UserJoined, UserLeft, UserLocationUpdated,
};
use nearchat_shared::{ConnectionId, Position};
use nearchat_store::User;

use crate::error::RelayError;
use crate::outbox::Outbox;
use crate::proximity::{ProximityResolver, ProximityResult};
use crate::registry::{Entry, Registry};
use crate::sink::{fetch_recent, PersistenceSink, SinkWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Active,
    Closed,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            SessionState::Unregistered => "unregistered",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

/// Router-side state of one transport session. Owned by the task serving
/// that connection, so transitions for one connection never race.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn require(&self, wanted: SessionState, event: &'static str) -> Result<(), RelayError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(RelayError::InvalidState {
                event,
                state: self.state.as_str(),
            })
        }
    }
}

pub struct Router {
    registry: Arc<Registry>,
    resolver: ProximityResolver,
    outbox: Outbox,
    sink: Arc<dyn PersistenceSink>,
    writer: SinkWriter,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        outbox: Outbox,
        sink: Arc<dyn PersistenceSink>,
        writer: SinkWriter,
    ) -> Self {
        Self {
            resolver: ProximityResolver::new(registry.clone()),
            registry,
            outbox,
            sink,
            writer,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ProximityResolver {
        &self.resolver
    }

    pub fn sink(&self) -> &Arc<dyn PersistenceSink> {
        &self.sink
    }

    pub fn writer(&self) -> &SinkWriter {
        &self.writer
    }

    /// Open transport sessions, registered or not.
    pub async fn session_count(&self) -> usize {
        self.outbox.len().await
    }

    /// A transport session opened. No registry entry exists until
    /// `register`.
    pub async fn connect(&self, tx: mpsc::Sender<ServerEvent>) -> Session {
        let id = ConnectionId::new();
        self.outbox.attach(id, tx).await;
        debug!(conn = %id, "Session opened");
        Session {
            id,
            state: SessionState::Unregistered,
        }
    }

    /// Dispatch one client event. Registration failures are reported back
    /// to the client; everything else is logged and dropped.
    pub async fn handle(&self, session: &mut Session, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::Register(req) => match self.register(session, req).await {
                Err(e) => {
                    warn!(conn = %session.id, error = %e, "Registration rejected");
                    self.reply(session, ServerEvent::error(e.to_string())).await;
                    return;
                }
                Ok(_) => Ok(()),
            },
            ClientEvent::UpdateLocation(update) => {
                self.update_location(session, update).await.map(|_| ())
            }
            ClientEvent::SendMessage(req) => {
                self.send_message(session, &req.message).await.map(|_| ())
            }
            ClientEvent::GetNearbyUsers => self.query_nearby(session).await.map(|_| ()),
        };

        if let Err(e) = result {
            debug!(conn = %session.id, event = name, error = %e, "Event ignored");
        }
    }

    pub async fn register(
        &self,
        session: &mut Session,
        req: RegisterRequest,
    ) -> Result<Vec<ProximityResult>, RelayError> {
        session.require(SessionState::Unregistered, "register")?;

        let name = req.username.trim();
        if name.is_empty() {
            return Err(RelayError::Validation("username must not be empty".into()));
        }

        let id = session.id;
        let entry = self
            .registry
            .register(id, name, req.latitude, req.longitude)
            .await?;
        session.state = SessionState::Active;
        let Some(position) = entry.position else {
            return Ok(Vec::new());
        };

        let nearby = self.resolver.find_nearby(&position, &id).await;

        self.deliver(&id, nearby_users(&nearby)).await;
        for peer in &nearby {
            let joined = ServerEvent::UserJoined(UserJoined {
                socket_id: id,
                username: entry.name.clone(),
                distance: peer.distance,
            });
            self.deliver(&peer.id, joined).await;
        }

        self.writer.save_user(user_record(&entry, &position));
        self.replay_recent(id, position);

        info!(
            conn = %id,
            name = %entry.name,
            lat = position.latitude(),
            lon = position.longitude(),
            nearby = nearby.len(),
            "User registered"
        );
        Ok(nearby)
    }

    pub async fn update_location(
        &self,
        session: &mut Session,
        update: LocationUpdate,
    ) -> Result<Vec<ProximityResult>, RelayError> {
        session.require(SessionState::Active, "updateLocation")?;

        let id = session.id;
        let entry = self
            .registry
            .update_position(id, update.latitude, update.longitude)
            .await?;
        let Some(position) = entry.position else {
            return Ok(Vec::new());
        };

        let nearby = self.resolver.find_nearby(&position, &id).await;
        for peer in &nearby {
            let moved = ServerEvent::UserLocationUpdated(UserLocationUpdated {
                socket_id: id,
                username: entry.name.clone(),
                latitude: position.latitude(),
                longitude: position.longitude(),
                distance: peer.distance,
            });
            self.deliver(&peer.id, moved).await;
        }

        self.writer.save_user(user_record(&entry, &position));

        debug!(conn = %id, nearby = nearby.len(), "Location updated");
        Ok(nearby)
    }

    /// Relay `text` to everyone near the sender. Returns `None` when the
    /// message was ignored (blank text or no position).
    pub async fn send_message(
        &self,
        session: &mut Session,
        text: &str,
    ) -> Result<Option<ChatMessage>, RelayError> {
        session.require(SessionState::Active, "sendMessage")?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let id = session.id;
        let entry = self
            .registry
            .get(&id)
            .await
            .ok_or(RelayError::UnknownConnection(id))?;
        let Some(position) = entry.position else {
            return Ok(None);
        };

        let message = ChatMessage::new(id, entry.name, text.to_string(), position);
        let nearby = self.resolver.find_nearby(&position, &id).await;

        let delivered = self
            .outbox
            .fan_out(
                nearby.iter().map(|p| p.id).collect::<Vec<_>>(),
                &ServerEvent::NewMessage(message.clone()),
            )
            .await;
        self.deliver(&id, ServerEvent::MessageSent(message.clone()))
            .await;

        self.writer.save_message(message.clone());

        info!(
            conn = %id,
            nearby = nearby.len(),
            delivered,
            "Message relayed"
        );
        Ok(Some(message))
    }

    pub async fn query_nearby(
        &self,
        session: &mut Session,
    ) -> Result<Vec<ProximityResult>, RelayError> {
        session.require(SessionState::Active, "getNearbyUsers")?;

        let id = session.id;
        let entry = self
            .registry
            .get(&id)
            .await
            .ok_or(RelayError::UnknownConnection(id))?;
        let Some(position) = entry.position else {
            return Ok(Vec::new());
        };

        let nearby = self.resolver.find_nearby(&position, &id).await;
        self.deliver(&id, nearby_users(&nearby)).await;
        Ok(nearby)
    }

    /// Close the session. Safe to call any number of times; only the first
    /// call has effects.
    pub async fn disconnect(&self, session: &mut Session) {
        let id = session.id;
        match session.state {
            SessionState::Closed => return,
            SessionState::Unregistered => {}
            SessionState::Active => {
                // Removed first so nobody can find this connection once they
                // have been told it left.
                if let Some(entry) = self.registry.remove(&id).await {
                    self.announce_departure(&entry).await;
                    info!(conn = %id, name = %entry.name, "User left");
                }
            }
        }

        self.outbox.detach(&id).await;
        session.state = SessionState::Closed;
        debug!(conn = %id, "Session closed");
    }

    async fn announce_departure(&self, entry: &Entry) {
        let Some(position) = entry.position else {
            return;
        };
        let nearby = self.resolver.find_nearby(&position, &entry.id).await;
        let left = ServerEvent::UserLeft(UserLeft {
            socket_id: entry.id,
            username: entry.name.clone(),
        });
        self.outbox
            .fan_out(nearby.iter().map(|p| p.id).collect::<Vec<_>>(), &left)
            .await;
    }

    /// Push an event back to the session's own client.
    pub async fn reply(&self, session: &Session, event: ServerEvent) {
        self.deliver(&session.id, event).await;
    }

    /// Push to one connection; failure is logged and swallowed.
    async fn deliver(&self, to: &ConnectionId, event: ServerEvent) {
        if let Err(e) = self.outbox.push(to, event).await {
            warn!(peer = %to, error = %e, "Push failed");
        }
    }

    /// Send the newly registered client what was said around it lately.
    /// Runs detached; storage latency never delays the join.
    fn replay_recent(&self, id: ConnectionId, position: Position) {
        let sink = self.sink.clone();
        let outbox = self.outbox.clone();
        let radius = self.resolver.radius_m();

        tokio::spawn(async move {
            let window = Duration::from_secs(RECENT_MESSAGE_WINDOW_SECS);
            match fetch_recent(sink, window, position, radius).await {
                Ok(messages) if messages.is_empty() => {}
                Ok(messages) => {
                    let count = messages.len();
                    if let Err(e) = outbox.push(&id, ServerEvent::RecentMessages(messages)).await {
                        warn!(conn = %id, error = %e, "Recent message replay not delivered");
                    } else {
                        debug!(conn = %id, count, "Replayed recent messages");
                    }
                }
                Err(e) => warn!(conn = %id, error = %e, "Recent message lookup failed"),
            }
        });
    }
}

fn nearby_users(nearby: &[ProximityResult]) -> ServerEvent {
    ServerEvent::NearbyUsers(nearby.iter().map(NearbyUser::from).collect())
}

fn user_record(entry: &Entry, position: &Position) -> User {
    User {
        socket_id: entry.id,
        username: entry.name.clone(),
        latitude: position.latitude(),
        longitude: position.longitude(),
        last_seen: entry.last_seen,
    }
}
