//! # nearchat-server
//!
//! Location-gated chat relay.
//!
//! This binary provides:
//! - **WebSocket relay** (`/ws`) where clients register with a name and a GPS
//!   position; every message is pushed only to connections within 30 m of
//!   the sender
//! - **Connection registry** and proximity resolver, recomputed on every
//!   event (no spatial index)
//! - **SQLite persistence** of users and messages through a bounded,
//!   fire-and-forget write queue
//! - **REST API** (axum) for health checks, the live connection list and
//!   recent nearby messages
//! - **Rate limiting** per IP (HTTP) and per connection (WebSocket events)

mod api;
mod config;
mod error;
mod outbox;
mod proximity;
mod rate_limit;
mod registry;
mod router;
mod sink;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nearchat_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::outbox::Outbox;
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use crate::router::Router;
use crate::sink::{NullSink, PersistenceSink, SinkWriter, StoreSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nearchat_server=debug")),
        )
        .init();

    info!("Starting nearchat relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Persistence is optional: without a database the relay runs memory-only.
    let sink = open_sink(&config);
    let writer = SinkWriter::spawn(sink.clone(), config.sink_queue_capacity);

    let registry = Arc::new(Registry::new());
    let router = Arc::new(Router::new(registry, Outbox::new(), sink, writer));

    let http_limiter = RateLimiter::default();
    let event_limiter = RateLimiter::new(config.event_rate, config.event_burst);

    let app_state = AppState {
        router,
        http_limiter: http_limiter.clone(),
        event_limiter,
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic HTTP rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = http_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(std::time::Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn open_sink(config: &ServerConfig) -> Arc<dyn PersistenceSink> {
    if !config.persistence_enabled {
        info!("Persistence disabled, running memory-only");
        return Arc::new(NullSink);
    }

    let opened = match &config.database_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    };

    match opened {
        Ok(db) => {
            info!(path = ?db.path(), "Persistence enabled");
            Arc::new(StoreSink::new(db))
        }
        Err(e) => {
            warn!(error = %e, "Could not open database, running memory-only");
            Arc::new(NullSink)
        }
    }
}
