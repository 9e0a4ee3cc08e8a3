use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::Method,
    middleware,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use nearchat_shared::constants::{PROXIMITY_RADIUS_M, RECENT_MESSAGE_WINDOW_SECS};
use nearchat_shared::protocol::ChatMessage;
use nearchat_shared::{ConnectionId, Position};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::router::Router as EventRouter;
use crate::sink::fetch_recent;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub http_limiter: RateLimiter<IpAddr>,
    pub event_limiter: RateLimiter<ConnectionId>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/users", get(list_users))
        .route("/api/messages", get(recent_messages))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            state.http_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    radius_m: f64,
    connections: usize,
    sessions: usize,
    persistence_enabled: bool,
    persistence_dropped: u64,
    uptime_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    socket_id: ConnectionId,
    username: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    last_seen: DateTime<Utc>,
}

#[derive(Deserialize)]
struct MessagesQuery {
    lat: Option<f64>,
    lon: Option<f64>,
    radius: Option<f64>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        radius_m: state.router.resolver().radius_m(),
        connections: state.router.registry().len().await,
        sessions: state.router.session_count().await,
        persistence_enabled: state.config.persistence_enabled,
        persistence_dropped: state.router.writer().dropped(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn list_users(State(state): State<AppState>) -> Json<Vec<UserView>> {
    let users = state
        .router
        .registry()
        .snapshot()
        .await
        .into_iter()
        .map(|entry| UserView {
            socket_id: entry.id,
            username: entry.name,
            latitude: entry.position.map(|p| p.latitude()),
            longitude: entry.position.map(|p| p.longitude()),
            last_seen: entry.last_seen,
        })
        .collect();
    Json(users)
}

async fn recent_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let (Some(lat), Some(lon)) = (query.lat, query.lon) else {
        return Err(ServerError::BadRequest("lat and lon are required".into()));
    };
    let near = Position::new(lat, lon).map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let radius = query.radius.unwrap_or(PROXIMITY_RADIUS_M);
    if !radius.is_finite() || radius <= 0.0 {
        return Err(ServerError::BadRequest("radius must be a positive number".into()));
    }

    let messages = fetch_recent(
        state.router.sink().clone(),
        Duration::from_secs(RECENT_MESSAGE_WINDOW_SECS),
        near,
        radius,
    )
    .await?;

    Ok(Json(messages))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP/WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
