//! # nearchat-shared
//!
//! Types shared by the nearchat relay crates: connection identities,
//! validated GPS positions, the haversine distance used for every proximity
//! decision, and the JSON event protocol spoken over the WebSocket.

pub mod constants;
pub mod error;
pub mod geo;
pub mod protocol;
pub mod types;

pub use error::{GeoError, ProtocolError};
pub use geo::{distance_meters, Position};
pub use types::ConnectionId;
