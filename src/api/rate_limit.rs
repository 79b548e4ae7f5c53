//! Login throttling per client address.
//!
//! Sliding window: each address gets `login_attempts_per_window` tokens per
//! window, and tokens trickle back in proportion to the time since the last
//! attempt.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::context::client_ip_from_headers;
use crate::AppState;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

impl RateLimitEntry {
    fn new(max_tokens: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    /// Keyed by client address as reported by the proxy headers
    entries: DashMap<String, RateLimitEntry>,
    config: RateLimitConfig,
    window_duration: Duration,
}

/// Quota left after an allowed attempt
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    /// Consume one attempt for `client`. Err carries the retry delay in seconds.
    pub fn check(&self, client: &str) -> Result<RateLimitInfo, u64> {
        let max_tokens = self.config.login_attempts_per_window;
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: max_tokens,
                limit: max_tokens,
                reset_after: 0,
            });
        }

        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(client.to_string())
            .or_insert_with(|| RateLimitEntry::new(max_tokens));

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.tokens = max_tokens;
            entry.window_start = now;
        } else {
            let since_last = now.duration_since(entry.last_request);
            let replenish_rate = max_tokens as f64 / self.window_duration.as_secs_f64();
            let replenished = (since_last.as_secs_f64() * replenish_rate) as u32;
            entry.tokens = entry.tokens.saturating_add(replenished).min(max_tokens);
        }
        entry.last_request = now;

        let reset_after = self.window_duration.saturating_sub(elapsed).as_secs();
        if entry.tokens > 0 {
            entry.tokens -= 1;
            Ok(RateLimitInfo {
                remaining: entry.tokens,
                limit: max_tokens,
                reset_after,
            })
        } else {
            Err(reset_after.max(1))
        }
    }

    /// Forget addresses idle for two windows
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window_duration * 2;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

fn set_header(response: &mut Response, name: &'static str, value: u64) {
    response
        .headers_mut()
        .insert(HeaderName::from_static(name), HeaderValue::from(value));
}

/// Middleware guarding `POST /login`
pub async fn rate_limit_login(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_ip_from_headers(request.headers(), peer).unwrap_or_else(|| "unknown".to_string());

    match state.rate_limiter.check(&client) {
        Ok(info) => {
            let mut response = next.run(request).await;
            set_header(&mut response, "x-ratelimit-limit", info.limit.into());
            set_header(&mut response, "x-ratelimit-remaining", info.remaining.into());
            set_header(&mut response, "x-ratelimit-reset", info.reset_after);
            response
        }
        Err(retry_after) => {
            tracing::warn!(client = %client, retry_after, "Login rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Too many login attempts. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            set_header(&mut response, "retry-after", retry_after);
            set_header(&mut response, "x-ratelimit-remaining", 0);
            response
        }
    }
}

/// Spawn a background task to periodically clean up expired rate limit entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}
