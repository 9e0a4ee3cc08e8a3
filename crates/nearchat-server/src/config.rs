//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use nearchat_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for HTTP and WebSocket traffic.
    /// Env: `HOST` + `PORT`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"nearchat"`
    pub instance_name: String,

    /// Whether users and messages are written to SQLite at all.
    /// Env: `PERSISTENCE_ENABLED` (true/false)
    /// Default: `true`
    pub persistence_enabled: bool,

    /// SQLite file. `None` means the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Pending persistence jobs before new ones are dropped.
    /// Env: `SINK_QUEUE_CAPACITY`
    /// Default: `1024`
    pub sink_queue_capacity: usize,

    /// Pending outbound frames per connection before pushes to it fail.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: `64`
    pub outbound_buffer: usize,

    /// Sustained client events per second per connection.
    /// Env: `EVENT_RATE`
    /// Default: `10`
    pub event_rate: f64,

    /// Client event burst per connection.
    /// Env: `EVENT_BURST`
    /// Default: `30`
    pub event_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: APP_NAME.to_string(),
            persistence_enabled: true,
            database_path: None,
            sink_queue_capacity: 1024,
            outbound_buffer: 64,
            event_rate: 10.0,
            event_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            match host.parse::<IpAddr>() {
                Ok(ip) => config.http_addr.set_ip(ip),
                Err(_) => tracing::warn!(value = %host, "Invalid HOST, using default"),
            }
        }

        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.http_addr.set_port(p),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("PERSISTENCE_ENABLED") {
            config.persistence_enabled = val != "false" && val != "0";
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = parse_positive::<usize>(&lookup, "SINK_QUEUE_CAPACITY") {
            config.sink_queue_capacity = n;
        }

        if let Some(n) = parse_positive::<usize>(&lookup, "OUTBOUND_BUFFER") {
            config.outbound_buffer = n;
        }

        if let Some(rate) = parse_positive::<f64>(&lookup, "EVENT_RATE") {
            config.event_rate = rate;
        }

        if let Some(burst) = parse_positive::<f64>(&lookup, "EVENT_BURST") {
            config.event_burst = burst;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            tracing::warn!(key, value = %raw, "Expected a positive number, using default");
            None
        }
    }
}
