// ABOUTME: Per-IP fixed-window rate limiting for the token, device, login, and introspection endpoints
// ABOUTME: Sharded DashMap state with lazy cleanup; reports remaining quota and Retry-After
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;

/// Outcome of one rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request must be rejected
    pub is_limited: bool,
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix time at which the window resets
    pub reset_at: i64,
    /// Seconds until a retry can succeed, when limited
    pub retry_after_seconds: Option<u64>,
}

/// Rate limiter with per-endpoint, per-IP windows
///
/// `DashMap` shards the state so concurrent requests from different clients
/// rarely contend on the same lock.
#[derive(Clone)]
pub struct OAuth2RateLimiter {
    /// (endpoint, IP) -> (`request_count`, `window_start`)
    state: Arc<DashMap<(&'static str, IpAddr), (u32, Instant)>>,
    config: RateLimitConfig,
}

impl OAuth2RateLimiter {
    /// Create a rate limiter from configuration
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Whether limiting is switched on
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Count one request from `client_ip` at `endpoint`
    #[must_use]
    pub fn check_rate_limit(&self, endpoint: &'static str, client_ip: IpAddr) -> RateLimitStatus {
        let limit = self.config.requests_per_window;
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_seconds);

        let mut entry = self.state.entry((endpoint, client_ip)).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= window {
            *count = 0;
            *window_start = now;
        }

        let is_limited = *count >= limit;
        if !is_limited {
            *count += 1;
        }
        let remaining = limit.saturating_sub(*count);
        let until_reset = window.saturating_sub(now.duration_since(*window_start));
        drop(entry);

        // Lazy cleanup keeps the hot path free of full-map locks
        if self.state.len() > self.config.cleanup_threshold {
            self.cleanup_old_entries(now, window);
        }

        let reset_at = (SystemTime::now() + until_reset)
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since_epoch| {
                i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX)
            });

        RateLimitStatus {
            is_limited,
            limit,
            remaining,
            reset_at,
            retry_after_seconds: is_limited.then(|| until_reset.as_secs().max(1)),
        }
    }

    /// Drop windows that have already elapsed
    fn cleanup_old_entries(&self, now: Instant, window: Duration) {
        self.state
            .retain(|_key, (_count, start)| now.duration_since(*start) < window);
    }
}
