// ABOUTME: Rate limiting middleware for credential-bearing endpoints
// ABOUTME: Rejects over-quota clients with 429 and standard rate limit headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Rate Limiting Middleware with HTTP Headers
//!
//! Adds `X-RateLimit-*` headers to responses of limited endpoints and turns
//! exhausted quotas into `429 Too Many Requests` with `Retry-After`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue};

use crate::constants::endpoints;
use crate::errors::{AppError, ErrorCode};
use crate::logging::AppLogger;
use crate::oauth2_server::rate_limiting::{OAuth2RateLimiter, RateLimitStatus};

/// HTTP header names for rate limiting
pub mod headers {
    /// Maximum requests allowed in the current window
    pub const X_RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
    /// Remaining requests in the current window
    pub const X_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
    /// Unix timestamp when the window resets
    pub const X_RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
    /// Seconds to wait before retrying
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Endpoints that accept credentials or mint codes
pub const LIMITED_ENDPOINTS: &[&str] = &[
    endpoints::TOKEN,
    endpoints::DEVICE,
    endpoints::LOGIN,
    endpoints::INTROSPECT,
];

/// Create a `HeaderMap` with rate limit headers
#[must_use]
pub fn create_rate_limit_headers(status: &RateLimitStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(headers::X_RATE_LIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(
        headers::X_RATE_LIMIT_REMAINING,
        HeaderValue::from(status.remaining),
    );
    headers.insert(headers::X_RATE_LIMIT_RESET, HeaderValue::from(status.reset_at));
    if let Some(retry_after) = status.retry_after_seconds {
        headers.insert(headers::RETRY_AFTER, HeaderValue::from(retry_after));
    }
    headers
}

/// Create the rate limit exceeded error
#[must_use]
pub fn create_rate_limit_error(status: &RateLimitStatus) -> AppError {
    AppError::new(
        ErrorCode::RateLimitExceeded,
        format!(
            "Rate limit exceeded. You have reached your limit of {} requests",
            status.limit
        ),
    )
}

/// Axum middleware applying [`OAuth2RateLimiter`] to [`LIMITED_ENDPOINTS`]
pub async fn rate_limit(
    State(limiter): State<OAuth2RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = LIMITED_ENDPOINTS
        .iter()
        .copied()
        .find(|path| *path == request.uri().path());
    let Some(endpoint) = endpoint.filter(|_| limiter.is_enabled()) else {
        return next.run(request).await;
    };

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());
    let status = limiter.check_rate_limit(endpoint, client_ip);

    if status.is_limited {
        AppLogger::log_security_event(
            "rate_limit_exceeded",
            "medium",
            &format!("endpoint={endpoint} ip={client_ip}"),
            None,
        );
        let mut response = create_rate_limit_error(&status).into_response();
        response
            .headers_mut()
            .extend(create_rate_limit_headers(&status));
        return response;
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .extend(create_rate_limit_headers(&status));
    response
}
