use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use nearchat_shared::{ConnectionId, GeoError};
use nearchat_store::StoreError;

/// Failures inside the relay core. None of these ever abort fan-out: a
/// rejected `register` is reported to the originating client, everything
/// else is logged and the event becomes a no-op.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidPosition(#[from] GeoError),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Event {event} is not valid while {state}")]
    InvalidState {
        event: &'static str,
        state: &'static str,
    },

    #[error("Push to {peer} failed: {reason}")]
    Push { peer: ConnectionId, reason: String },
}

/// Storage failures. Logged by the persistence worker; never seen by the
/// delivery path.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database lock poisoned")]
    Poisoned,

    #[error("Blocking task failed: {0}")]
    Join(String),

    #[error("Lookback window out of range: {0:?}")]
    Window(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Storage error: {0}")]
    Sink(#[from] SinkError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Sink(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
