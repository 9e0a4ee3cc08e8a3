//! WebSocket transport adapter.
//!
//! Maps wire frames to router calls. Each socket gets one reader loop that
//! owns the connection's [`Session`](crate::router::Session), and one writer
//! task that drains the outbound channel into the socket. When the reader
//! loop ends for any reason the session is disconnected exactly once.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use nearchat_shared::constants::MAX_FRAME_SIZE;
use nearchat_shared::protocol::{ClientEvent, ServerEvent};

use crate::api::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);
    let mut session = state.router.connect(tx).await;
    let id = session.id();
    info!(conn = %id, "WebSocket connected");

    // Ends once the router drops the channel on disconnect, or the socket
    // stops accepting writes.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(conn = %id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text)).await {
                debug!(conn = %id, error = %e, "Socket closed while writing");
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(data)) => {
                debug!(conn = %id, len = data.len(), "Ignoring binary frame");
                continue;
            }
            // Ping/pong are answered by axum.
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %id, error = %e, "WebSocket read failed");
                break;
            }
        };

        if !state.event_limiter.check(&id).await {
            warn!(conn = %id, "Event rate limit exceeded");
            state
                .router
                .reply(&session, ServerEvent::error("Too many events, slow down"))
                .await;
            continue;
        }

        match ClientEvent::from_json(&text) {
            Ok(event) => {
                debug!(conn = %id, event = event.name(), "Client event");
                state.router.handle(&mut session, event).await;
            }
            Err(e) => {
                warn!(conn = %id, error = %e, "Malformed client frame");
                state
                    .router
                    .reply(&session, ServerEvent::error(e.to_string()))
                    .await;
            }
        }
    }

    state.router.disconnect(&mut session).await;
    state.event_limiter.forget(&id).await;
    info!(conn = %id, "WebSocket disconnected");
}
