/// Application name
pub const APP_NAME: &str = "nearchat";

/// Mean Earth radius in meters (spherical model)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Two connections are "nearby" when at most this far apart, in meters
pub const PROXIMITY_RADIUS_M: f64 = 30.0;

/// Slack added to the radius comparison so that a pair constructed to sit
/// exactly on the boundary is not excluded by float rounding
pub const PROXIMITY_EPSILON_M: f64 = 1e-6;

/// Recent-message window served on join and by the HTTP API (1 hour)
pub const RECENT_MESSAGE_WINDOW_SECS: u64 = 3600;

/// Maximum number of recent messages fetched from storage
pub const RECENT_MESSAGE_LIMIT: u32 = 50;

/// Maximum WebSocket frame size accepted from clients (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;
