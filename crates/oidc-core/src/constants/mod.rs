// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Grant types, scopes, claim names, token lifetimes, and endpoint paths
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Constants are grouped into logical domains rather than being in a single
//! flat list.

/// OAuth 2.0 grant type identifiers
pub mod grant_types {
    /// Authorization code grant (RFC 6749 Section 4.1)
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    /// Refresh token grant (RFC 6749 Section 6)
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Device authorization grant (RFC 8628 Section 3.4)
    pub const DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
    /// Short alias accepted for the device grant
    pub const DEVICE_CODE_ALIAS: &str = "device_code";
    /// Resource owner password credentials grant (RFC 6749 Section 4.3)
    pub const PASSWORD: &str = "password";
}

/// Scope values understood by the server
pub mod scopes {
    /// Requests an identity token
    pub const OPENID: &str = "openid";
    /// `email`, `email_verified` claims
    pub const EMAIL: &str = "email";
    /// `name`, `given_name`, `family_name`, `preferred_username` claims
    pub const PROFILE: &str = "profile";
    /// `role` claim
    pub const ROLES: &str = "roles";
    /// Requests a refresh token
    pub const OFFLINE_ACCESS: &str = "offline_access";
    /// Resource API scope served by `rs_dataEventRecordsApi`
    pub const DATA_EVENT_RECORDS: &str = "dataEventRecords";

    /// Every scope the server will grant
    pub const SUPPORTED: &[&str] = &[
        OPENID,
        EMAIL,
        PROFILE,
        ROLES,
        OFFLINE_ACCESS,
        DATA_EVENT_RECORDS,
    ];
}

/// JWT claim names and token type markers
pub mod claims {
    /// Access token `typ` header (RFC 9068)
    pub const ACCESS_TOKEN_TYP: &str = "at+jwt";
    /// Refresh token `typ` header
    pub const REFRESH_TOKEN_TYP: &str = "rt+jwt";
    /// Identity and session token `typ` header
    pub const JWT_TYP: &str = "JWT";
    /// Audience of login session tokens
    pub const SESSION_AUDIENCE: &str = "urn:oidc-provider:session";
}

/// Identity token encryption (compact JWE)
pub mod encryption {
    /// Key management algorithm (RFC 7518 Section 4.3)
    pub const KEY_ALGORITHM: &str = "RSA-OAEP-256";
    /// Content encryption algorithm (RFC 7518 Section 5.3)
    pub const CONTENT_ALGORITHM: &str = "A256GCM";
    /// `cty` of a JWE wrapping a signed JWT (RFC 7519 Section 5.2)
    pub const NESTED_CONTENT_TYPE: &str = "JWT";
    /// Smallest client encryption key accepted at registration
    pub const MIN_RSA_BITS: usize = 2048;
}

/// Default lifetimes in seconds
pub mod lifetimes {
    /// Authorization code
    pub const AUTHORIZATION_CODE_SECS: i64 = 600;
    /// Device code and user code
    pub const DEVICE_CODE_SECS: i64 = 900;
    /// Minimum device polling interval
    pub const DEVICE_POLL_INTERVAL_SECS: i64 = 5;
    /// Added to the polling interval on every `slow_down`
    pub const DEVICE_SLOW_DOWN_INCREMENT_SECS: i64 = 5;
    /// Access token
    pub const ACCESS_TOKEN_SECS: i64 = 3600;
    /// Identity token
    pub const IDENTITY_TOKEN_SECS: i64 = 1200;
    /// Refresh token (14 days)
    pub const REFRESH_TOKEN_SECS: i64 = 1_209_600;
    /// Login session cookie (8 hours)
    pub const SESSION_SECS: i64 = 28_800;
    /// Revoked refresh tokens kept for replay detection before sweeping
    pub const REVOKED_RETENTION_SECS: i64 = 86_400;
    /// Signing key rotation interval
    pub const KEY_ROTATION_DAYS: i64 = 90;
}

/// PKCE (RFC 7636) limits
pub mod pkce {
    /// Only supported challenge method
    pub const METHOD_S256: &str = "S256";
    /// Minimum verifier and challenge length
    pub const MIN_LENGTH: usize = 43;
    /// Maximum verifier and challenge length
    pub const MAX_LENGTH: usize = 128;
}

/// Device flow user code format (RFC 8628 Section 6.1)
pub mod user_code {
    /// Base-20 consonant alphabet, no vowels to avoid forming words
    pub const ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
    /// Characters per group
    pub const GROUP_LENGTH: usize = 4;
    /// Number of groups separated by `-`
    pub const GROUPS: usize = 2;
}

/// HTTP endpoint paths
pub mod endpoints {
    /// Authorization endpoint
    pub const AUTHORIZE: &str = "/connect/authorize";
    /// Token endpoint
    pub const TOKEN: &str = "/connect/token";
    /// Device authorization endpoint
    pub const DEVICE: &str = "/connect/device";
    /// Device verification endpoint
    pub const VERIFY: &str = "/connect/verify";
    /// Userinfo endpoint
    pub const USERINFO: &str = "/connect/userinfo";
    /// Token introspection endpoint
    pub const INTROSPECT: &str = "/connect/introspect";
    /// Token revocation endpoint
    pub const REVOKE: &str = "/connect/revoke";
    /// Login endpoint
    pub const LOGIN: &str = "/connect/login";
    /// End-session endpoint
    pub const LOGOUT: &str = "/connect/logout";
    /// Discovery document
    pub const DISCOVERY: &str = "/.well-known/openid-configuration";
    /// Public signing keys
    pub const JWKS: &str = "/.well-known/jwks.json";
    /// Health check endpoint
    pub const HEALTH_CHECK: &str = "/health";
}

/// Cookie names
pub mod cookies {
    /// Login session cookie
    pub const SESSION: &str = "oidc_session";
}

/// Service identification used in logs
pub mod service_names {
    /// Default service name
    pub const OIDC_PROVIDER: &str = "oidc-provider";
}
