//! Per-client, per-class fixed-window rate limiting
//!
//! **Design:**
//! - One `RateLimitWindow` per (client key, rate class), created lazily on
//!   the first request and reset once its window has fully elapsed
//! - Keyed store is a `DashMap`; the entry guard serializes concurrent
//!   requests for the same key so bursts are never undercounted
//! - Denied requests do not consume quota
//! - Client key is `user:<id>` for verified identities, otherwise
//!   `ip:<addr>` (respects `X-Forwarded-For` via connection info)

use crate::middleware::jwt::Identity;
use crate::routes::RateClass;
use actix_web::HttpRequest;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

impl Quota {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Quotas for each rate class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub short: Quota,
    pub medium: Quota,
    pub long: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short: Quota::new(5, Duration::from_secs(60)),
            medium: Quota::new(3, Duration::from_secs(600)),
            long: Quota::new(100, Duration::from_secs(60)),
        }
    }
}

impl RateLimitConfig {
    pub fn quota(&self, class: RateClass) -> Quota {
        match class {
            RateClass::Short => self.short,
            RateClass::Medium => self.medium,
            RateClass::Long => self.long,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub class: RateClass,
    pub window_start: Instant,
    pub request_count: u32,
    pub limit: u32,
    pub window_duration: Duration,
}

impl RateLimitWindow {
    fn new(class: RateClass, quota: Quota, now: Instant) -> Self {
        Self {
            class,
            window_start: now,
            request_count: 0,
            limit: quota.limit,
            window_duration: quota.window,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window_duration
    }

    fn reset_after(&self, now: Instant) -> Duration {
        self.window_duration
            .saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes
    pub reset_after: Duration,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<(String, RateClass), RateLimitWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, client_key: &str, class: RateClass) -> RateLimitDecision {
        self.check_at(client_key, class, Instant::now())
    }

    /// Count one request for `client_key` in `class` at time `now`.
    pub fn check_at(&self, client_key: &str, class: RateClass, now: Instant) -> RateLimitDecision {
        let quota = self.config.quota(class);

        // The entry guard holds the shard lock until the decision is made
        let mut window = self
            .windows
            .entry((client_key.to_string(), class))
            .or_insert_with(|| RateLimitWindow::new(class, quota, now));

        if window.is_expired(now) {
            window.window_start = now;
            window.request_count = 0;
        }

        let allowed = window.request_count < window.limit;
        if allowed {
            window.request_count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: window.limit,
            remaining: window.limit.saturating_sub(window.request_count),
            reset_after: window.reset_after(now),
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            debug!(purged, remaining = self.windows.len(), "Purged expired rate limit windows");
        }
        purged
    }

    /// Number of live windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Rate limit key for a request: the verified user when known, else the client IP.
///
/// The IP is the TCP peer. `Forwarded` / `X-Forwarded-For` are only honoured
/// when `trust_forwarded` is set, i.e. the gateway sits behind a proxy that
/// overwrites them; otherwise any caller could rotate the header to get a
/// fresh window.
pub fn client_key(identity: Option<&Identity>, req: &HttpRequest, trust_forwarded: bool) -> String {
    if let Some(identity) = identity {
        return format!("user:{}", identity.user_id);
    }

    let ip = if trust_forwarded {
        req.connection_info()
            .realip_remote_addr()
            .map(|addr| addr.split(',').next().unwrap_or(addr).trim().to_string())
    } else {
        req.peer_addr().map(|addr| addr.ip().to_string())
    };
    format!("ip:{}", ip.unwrap_or_else(|| "unknown".to_string()))
}
