//! Token-bucket throttling for HTTP requests (per client IP) and WebSocket
//! events (per connection).

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ServerError;

/// Sustained rate (tokens per second) and burst size of a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    pub rate: f64,
    pub burst: f64,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    touched: Instant,
}

impl Bucket {
    fn full(limit: Limit, now: Instant) -> Self {
        Self {
            tokens: limit.burst,
            touched: now,
        }
    }

    fn take(&mut self, limit: Limit, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.touched).as_secs_f64();
        self.touched = now;
        self.tokens = (self.tokens + idle * limit.rate).min(limit.burst);

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }
        allowed
    }
}

/// Shared table of buckets, one per key. Cloning shares the table.
#[derive(Clone)]
pub struct RateLimiter<K> {
    buckets: Arc<Mutex<HashMap<K, Bucket>>>,
    limit: Limit,
}

impl<K> RateLimiter<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            limit: Limit { rate, burst },
        }
    }

    /// Spend one token for `key`; `false` means the caller is over its limit.
    pub async fn check(&self, key: &K) -> bool {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &K, now: Instant) -> bool {
        let limit = self.limit;
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket::full(limit, now))
            .take(limit, now)
    }

    /// Drop the bucket for a key that will not be seen again.
    pub async fn forget(&self, key: &K) {
        self.buckets.lock().await.remove(key);
    }

    /// Evict buckets untouched for longer than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| now.saturating_duration_since(bucket.touched) < max_idle);
    }
}

impl Default for RateLimiter<IpAddr> {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter<IpAddr>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(&ip).await {
            warn!(ip = %ip, "HTTP rate limit exceeded");
            return Err(ServerError::RateLimited);
        }
    }
    Ok(next.run(req).await)
}

/// Peer address when served with connect info, else the first hop of
/// `x-forwarded-for`, else `x-real-ip`.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    let header = |name: &str| req.headers().get(name)?.to_str().ok();
    header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .or_else(|| header("x-real-ip"))
        .and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearchat_shared::ConnectionId;

    #[tokio::test]
    async fn test_burst_then_reject() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_at(&ip, now).await);
        }
        assert!(!limiter.check_at(&ip, now).await);
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(2.0, 1.0);
        let id = ConnectionId::new();
        let start = Instant::now();

        assert!(limiter.check_at(&id, start).await);
        assert!(!limiter.check_at(&id, start).await);
        // Half a second at 2 tokens/s buys one more event, and no more.
        let later = start + Duration::from_millis(500);
        assert!(limiter.check_at(&id, later).await);
        assert!(!limiter.check_at(&id, later).await);
    }

    #[tokio::test]
    async fn test_connections_are_limited_independently() {
        let limiter = RateLimiter::new(0.001, 2.0);
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert!(limiter.check(&a).await);
        assert!(limiter.check(&a).await);
        assert!(!limiter.check(&a).await);

        assert!(limiter.check(&b).await);

        limiter.forget(&a).await;
        assert!(limiter.check(&a).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(limiter.check(&ip).await);

        limiter.purge_stale(Duration::from_secs(600)).await;
        assert_eq!(limiter.buckets.lock().await.len(), 1);

        limiter.purge_stale(Duration::ZERO).await;
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn test_client_ip_from_headers() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("203.0.113.7".parse().unwrap()));

        let req = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("198.51.100.2".parse().unwrap()));

        let req = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&req), None);
    }
}
