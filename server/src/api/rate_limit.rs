//! Per-identity rate limiting
//!
//! A fixed one-minute window per identity (per peer address for
//! unauthenticated requests), kept in-process in a concurrent map. Runs
//! inside the auth layer so the key is the authenticated agent, which is
//! what the limit is defined over.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::api::auth::Identity;
use crate::api::types::ApiError;

/// Outcome of a limiter check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds when the current window resets
    pub reset_at: i64,
}

#[derive(Debug)]
struct Window {
    minute: i64,
    count: u32,
}

/// Fixed-window counter keyed by identity
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    rpm: u32,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        Self {
            windows: DashMap::new(),
            rpm,
        }
    }

    pub fn check(&self, key: &str) -> RateLimitResult {
        let now = chrono::Utc::now().timestamp();
        let minute = now / 60;
        let reset_at = (minute + 1) * 60;

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { minute, count: 0 });
        if entry.minute != minute {
            entry.minute = minute;
            entry.count = 0;
        }

        if entry.count >= self.rpm {
            return RateLimitResult {
                allowed: false,
                limit: self.rpm,
                remaining: 0,
                reset_at,
            };
        }

        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit: self.rpm,
            remaining: self.rpm - entry.count,
            reset_at,
        }
    }

    /// Drop windows older than the current minute (sweeper maintenance)
    pub fn prune(&self) {
        let minute = chrono::Utc::now().timestamp() / 60;
        self.windows.retain(|_, window| window.minute >= minute);
    }
}

/// Rate limit middleware state
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
}

fn set_headers(response: &mut Response, result: &RateLimitResult) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&result.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&result.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&result.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Rate limiting middleware function
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .extensions()
        .get::<Identity>()
        .map(|identity| identity.agent_id.clone())
        .unwrap_or_else(|| addr.ip().to_string());

    let result = state.limiter.check(&key);
    if !result.allowed {
        tracing::debug!(%key, "Rate limit exceeded");
        return Err(ApiError::rate_limited("rate limit exceeded"));
    }

    let mut response = next.run(request).await;
    set_headers(&mut response, &result);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3);
        for expected_remaining in [2, 1, 0] {
            let result = limiter.check("a1");
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }
        let result = limiter.check("a1");
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a1").allowed);
        assert!(!limiter.check("a1").allowed);
        assert!(limiter.check("a2").allowed);
    }

    #[test]
    fn test_prune_keeps_current_window() {
        let limiter = RateLimiter::new(10);
        limiter.check("a1");
        limiter.prune();
        // current window survives pruning
        assert_eq!(limiter.check("a1").remaining, 8);
    }
}
