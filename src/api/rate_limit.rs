//! Per-IP rate limiting for the API and the auth endpoints.
//!
//! Each (IP, tier) pair holds a bucket that refills continuously at
//! `limit / window` tokens per second.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Everything under `/api`
    Api,
    /// Login, registration and password reset
    Auth,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, RateLimitTier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

/// Rate limit state after an allowed request
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the bucket is full again
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    fn limit(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Take a token for `ip`. Returns the seconds to wait when none are left.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        self.check_at(ip, tier, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, tier: RateLimitTier, now: Instant) -> Result<RateLimitInfo, u64> {
        let limit = self.limit(tier);
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: limit,
                limit,
                reset_after: 0,
            });
        }

        let capacity = limit as f64;
        let per_second = capacity / self.window.as_secs_f64();

        let mut bucket = self.buckets.entry((ip, tier)).or_insert_with(|| Bucket {
            tokens: capacity,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * per_second).min(capacity);
        bucket.last_seen = now;

        if bucket.tokens < 1.0 {
            let wait = ((1.0 - bucket.tokens) / per_second).ceil() as u64;
            return Err(wait.max(1));
        }

        bucket.tokens -= 1.0;
        Ok(RateLimitInfo {
            remaining: bucket.tokens.floor() as u32,
            limit,
            reset_after: ((capacity - bucket.tokens) / per_second).ceil() as u64,
        })
    }

    /// Drop buckets idle for two windows; a fresh bucket starts full anyway
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let idle = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) < idle);
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Client IP from the socket. Proxy headers are consulted only when
/// `trust_proxy` is set, since any client can send them.
pub fn client_ip(
    headers: &HeaderMap,
    conn_info: Option<&SocketAddr>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        let from_header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok())
        };
        if let Some(ip) = from_header("x-forwarded-for").or_else(|| from_header("x-real-ip")) {
            return Some(ip);
        }
    }
    conn_info.map(|addr| addr.ip())
}

fn request_ip(request: &Request<Body>, trust_proxy: bool) -> IpAddr {
    let conn = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr);
    client_ip(request.headers(), conn, trust_proxy).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    limit_with_tier(&state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    limit_with_tier(&state, request, next, RateLimitTier::Auth).await
}

fn set_header(response: &mut Response, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

async fn limit_with_tier(
    state: &AppState,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let ip = request_ip(&request, state.config.rate_limit.trust_proxy_headers);

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            set_header(&mut response, "x-ratelimit-limit", info.limit as u64);
            set_header(&mut response, "x-ratelimit-remaining", info.remaining as u64);
            set_header(&mut response, "x-ratelimit-reset", info.reset_after);
            response
        }
        Err(retry_after) => {
            tracing::debug!(ip = %ip, tier = ?tier, retry_after, "Rate limited");
            let mut response = ApiError::rate_limited(format!(
                "Too many requests. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            set_header(&mut response, "retry-after", retry_after);
            set_header(&mut response, "x-ratelimit-remaining", 0);
            response
        }
    }
}

/// Periodically drop idle buckets
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(cleanup_interval_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                entries = rate_limiter.entry_count(),
                "Rate limiter cleanup complete"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            api_requests_per_window: 10,
            auth_requests_per_window: 3,
            window_seconds: 60,
            cleanup_interval: 300,
            trust_proxy_headers: false,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_blocks_after_limit_and_reports_wait() {
        let limiter = RateLimiter::new(test_config());
        let now = Instant::now();
        for i in 0..10 {
            assert!(
                limiter.check_at(ip("192.168.1.1"), RateLimitTier::Api, now).is_ok(),
                "request {} should pass",
                i
            );
        }
        let wait = limiter
            .check_at(ip("192.168.1.1"), RateLimitTier::Api, now)
            .unwrap_err();
        // one token refills every 6 seconds
        assert_eq!(wait, 6);
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(test_config());
        let start = Instant::now();
        for _ in 0..3 {
            limiter.check_at(ip("10.0.0.1"), RateLimitTier::Auth, start).unwrap();
        }
        assert!(limiter.check_at(ip("10.0.0.1"), RateLimitTier::Auth, start).is_err());

        // auth refills one token per 20 seconds
        let later = start + Duration::from_secs(21);
        assert!(limiter.check_at(ip("10.0.0.1"), RateLimitTier::Auth, later).is_ok());
    }

    #[test]
    fn test_ips_and_tiers_are_independent() {
        let limiter = RateLimiter::new(test_config());
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_at(ip("10.0.0.1"), RateLimitTier::Auth, now).unwrap();
        }
        assert!(limiter.check_at(ip("10.0.0.1"), RateLimitTier::Auth, now).is_err());
        assert!(limiter.check_at(ip("10.0.0.1"), RateLimitTier::Api, now).is_ok());
        assert!(limiter.check_at(ip("10.0.0.2"), RateLimitTier::Auth, now).is_ok());
    }

    #[test]
    fn test_disabled_allows_everything() {
        let mut config = test_config();
        config.enabled = false;
        let limiter = RateLimiter::new(config);
        for _ in 0..100 {
            assert!(limiter.check(ip("10.0.0.1"), RateLimitTier::Auth).is_ok());
        }
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_cleanup_keeps_recent_buckets() {
        let limiter = RateLimiter::new(test_config());
        limiter.check(ip("10.0.0.1"), RateLimitTier::Api).unwrap();
        limiter.cleanup_expired();
        assert_eq!(limiter.entry_count(), 1);
    }

    fn spoofed(forwarded: &str) -> Request<Body> {
        let mut request = Request::builder()
            .header("x-forwarded-for", forwarded)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("198.51.100.4:40000".parse().unwrap()));
        request
    }

    #[test]
    fn test_proxy_headers_ignored_unless_trusted() {
        let request = spoofed("203.0.113.7, 10.0.0.1");
        assert_eq!(request_ip(&request, false), ip("198.51.100.4"));
        assert_eq!(request_ip(&request, true), ip("203.0.113.7"));

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(request_ip(&bare, true), ip("127.0.0.1"));
    }

    #[test]
    fn test_rotating_forwarded_for_shares_one_bucket() {
        let limiter = RateLimiter::new(test_config());
        let now = Instant::now();
        let mut blocked = 0;
        for i in 0..10 {
            let request = spoofed(&format!("203.0.113.{}", i));
            if limiter
                .check_at(request_ip(&request, false), RateLimitTier::Auth, now)
                .is_err()
            {
                blocked += 1;
            }
        }
        assert_eq!(blocked, 7);
    }
}
