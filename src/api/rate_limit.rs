//! Request budgets with a sliding window.
//!
//! Every client address gets a budget per tier. Sign-in attempts are also
//! budgeted per account name, so spreading guesses for one driver across
//! many addresses runs into the same wall. This sits in front of the
//! database-backed lockout, which only counts failures.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::client::client_ip;
use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::error::Error;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// JSON endpoints
    Api,
    /// Login and registration
    Auth,
}

/// Who a budget belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Subject {
    Address(IpAddr),
    /// Lower-cased username from a sign-in form.
    Account(String),
}

/// Timestamps of the requests still inside the window, oldest first.
#[derive(Debug, Default)]
struct Window {
    hits: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, now: Instant, span: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) < span {
                break;
            }
            self.hits.pop_front();
        }
    }

    /// Whole seconds until the oldest hit leaves the window, at least one.
    fn seconds_until_slot(&self, now: Instant, span: Duration) -> u64 {
        let Some(&oldest) = self.hits.front() else {
            return 0;
        };
        let left = span.saturating_sub(now.duration_since(oldest));
        left.as_secs() + u64::from(left.subsec_nanos() > 0)
    }
}

/// Remaining budget after an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the oldest counted request expires.
    pub reset_after: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<(RateLimitTier, Subject), Window>,
    config: RateLimitConfig,
    span: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            span: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    /// Count one request from `ip` against `tier`. On refusal, returns the
    /// seconds until a slot frees up.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        self.admit(tier, Subject::Address(ip))
    }

    /// Count one sign-in attempt against the account `username`.
    pub fn check_account(&self, username: &str) -> Result<RateLimitInfo, u64> {
        self.admit(
            RateLimitTier::Auth,
            Subject::Account(username.trim().to_lowercase()),
        )
    }

    fn admit(&self, tier: RateLimitTier, subject: Subject) -> Result<RateLimitInfo, u64> {
        let limit = self.limit(tier);
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                limit,
                remaining: limit,
                reset_after: 0,
            });
        }

        let now = Instant::now();
        let mut window = self.windows.entry((tier, subject)).or_default();
        window.evict(now, self.span);

        let used = u32::try_from(window.hits.len()).unwrap_or(u32::MAX);
        if used >= limit {
            return Err(window.seconds_until_slot(now, self.span).max(1));
        }
        window.hits.push_back(now);
        Ok(RateLimitInfo {
            limit,
            remaining: limit - used - 1,
            reset_after: window.seconds_until_slot(now, self.span),
        })
    }

    fn limit(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Forget budgets with nothing left inside the window.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let span = self.span;
        self.windows.retain(|_, window| {
            window.evict(now, span);
            !window.hits.is_empty()
        });
    }

    pub fn entry_count(&self) -> usize {
        self.windows.len()
    }
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    limit_by_address(state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    limit_by_address(state, request, next, RateLimitTier::Auth).await
}

async fn limit_by_address(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let ip = client_ip(
        request.headers(),
        request.extensions(),
        &state.config.server.trusted_proxies,
    );

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(info.limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(info.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(info.reset_after));
            response
        }
        Err(retry_after) => {
            tracing::warn!(ip = %ip, tier = ?tier, retry_after, "Request budget exhausted");
            ApiError::from(Error::RateLimited { retry_after }).into_response()
        }
    }
}

/// Periodically drop budgets that have emptied out.
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(cleanup_interval_secs.max(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                budgets = rate_limiter.entry_count(),
                "Rate limiter cleanup complete"
            );
        }
    });
}
