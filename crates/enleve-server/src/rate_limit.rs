//! Per-client-IP token buckets in front of the function.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::FunctionConfig;
use crate::error::FunctionError;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            refilled_at: now,
        }
    }

    fn take(&mut self, now: Instant, per_sec: f64, burst: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.refilled_at = now;
        self.tokens = (self.tokens + elapsed * per_sec).min(burst);
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_sec,
            burst,
        }
    }

    pub fn from_config(config: &FunctionConfig) -> Self {
        Self::new(config.rate_limit_per_sec, config.rate_limit_burst)
    }

    pub async fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now()).await
    }

    async fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert_with(|| Bucket::full(self.burst, now))
            .take(now, self.per_sec, self.burst)
    }

    /// Forget clients idle for longer than `idle`.
    pub async fn purge_idle(&self, idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, b| now.saturating_duration_since(b.refilled_at) < idle);
    }
}

pub async fn limit_by_ip(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    if let Some(ip) = client_ip(&req) {
        if !limiter.allow(ip).await {
            warn!(ip = %ip, "rate limit exceeded");
            return FunctionError::RateLimited.into_response();
        }
    }
    next.run(req).await
}

/// Peer address, else the first `X-Forwarded-For` hop, else `X-Real-IP`.
fn client_ip(req: &Request) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header("x-real-ip"))
        .and_then(|v| v.trim().parse().ok())
}
