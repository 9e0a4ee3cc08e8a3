use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::geo::Position;
use crate::types::ConnectionId;

/// Events a client sends over its WebSocket.
///
/// Encoded as `{"event": "<name>", "data": {...}}`; `getNearbyUsers` carries
/// no `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Register(RegisterRequest),
    UpdateLocation(LocationUpdate),
    SendMessage(SendMessageRequest),
    GetNearbyUsers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterRequest {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Events the relay pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NearbyUsers(Vec<NearbyUser>),
    UserJoined(UserJoined),
    UserLocationUpdated(UserLocationUpdated),
    NewMessage(ChatMessage),
    /// Delivery confirmation to the sender; same payload as `NewMessage`.
    MessageSent(ChatMessage),
    UserLeft(UserLeft),
    RecentMessages(Vec<ChatMessage>),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearbyUser {
    pub socket_id: ConnectionId,
    pub username: String,
    pub distance: u32,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub socket_id: ConnectionId,
    pub username: String,
    pub distance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLocationUpdated {
    pub socket_id: ConnectionId,
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub socket_id: ConnectionId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

/// A chat message as relayed and persisted. Built once by the router and
/// never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_id: ConnectionId,
    pub sender_name: String,
    pub message: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender_id: ConnectionId, sender_name: String, message: String, at: Position) -> Self {
        Self {
            sender_id,
            sender_name,
            message,
            latitude: at.latitude(),
            longitude: at.longitude(),
            // Microseconds, matching what storage round-trips.
            timestamp: Utc::now().trunc_subsecs(6),
        }
    }

    /// Distance in meters from the sender's position to `point`.
    pub fn distance_to(&self, point: &Position) -> f64 {
        crate::geo::distance_meters(self.latitude, self.longitude, point.latitude(), point.longitude())
    }
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::UpdateLocation(_) => "updateLocation",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::GetNearbyUsers => "getNearbyUsers",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}
