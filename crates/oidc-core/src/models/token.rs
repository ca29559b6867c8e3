// ABOUTME: JWT claim sets, issued token metadata, and persisted token/key records
// ABOUTME: Access and refresh tokens share TokenClaims; identity tokens use IdTokenClaims
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::client::ScopeSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token kind, carried in the `token_use` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    /// Bearer access token for resource servers
    AccessToken,
    /// Persisted, revocable refresh token
    RefreshToken,
    /// OIDC identity token
    IdToken,
    /// Login session cookie
    Session,
}

impl TokenUse {
    /// Value used for `token_type_hint` and introspection `token_type`
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
            Self::Session => "session",
        }
    }
}

/// Claims of access, refresh, and session tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer URL
    pub iss: String,
    /// Subject identifier
    pub sub: String,
    /// Audiences
    pub aud: Vec<String>,
    /// Expiry (seconds since epoch, inclusive)
    pub exp: i64,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Unique token id
    pub jti: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: String,
    /// Token kind
    pub token_use: TokenUse,
    /// Authorization id shared by a grant and all tokens derived from it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azid: Option<String>,
    /// When the resource owner authenticated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
}

impl TokenClaims {
    /// Granted scopes as a set
    #[must_use]
    pub fn scopes(&self) -> ScopeSet {
        ScopeSet::parse(&self.scope)
    }

    /// Whether `audience` is one of the token audiences
    #[must_use]
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|aud| aud == audience)
    }
}

/// Claims of an OIDC identity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer URL
    pub iss: String,
    /// Subject identifier
    pub sub: String,
    /// Audiences (the client id)
    pub aud: Vec<String>,
    /// Expiry
    pub exp: i64,
    /// Issued at
    pub iat: i64,
    /// When the resource owner authenticated
    pub auth_time: i64,
    /// Authorized party
    pub azp: String,
    /// Token kind, always `id_token`
    pub token_use: TokenUse,
    /// Nonce from the authorization request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Left half of the SHA-256 of the access token, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    /// `email` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `email` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    /// `profile` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `profile` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// `profile` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// `profile` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// `roles` scope
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role: Vec<String>,
}

/// A freshly minted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Compact JWS
    pub value: String,
    /// `jti` (or a digest for identity tokens)
    pub token_id: String,
    /// Token kind
    pub kind: TokenUse,
    /// Subject identifier
    pub subject_id: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: ScopeSet,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Expiry, strictly after `issued_at`
    pub expires_at: DateTime<Utc>,
    /// Signing key id
    pub key_id: String,
}

impl IssuedToken {
    /// Remaining lifetime in seconds, for `expires_in`
    #[must_use]
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - self.issued_at).num_seconds()
    }
}

/// Persisted refresh token record (the revocation source of truth)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    /// `jti` of the refresh JWT
    pub token_id: String,
    /// Authorization the token descends from
    pub authorization_id: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Subject identifier
    pub subject_id: String,
    /// Granted scopes
    pub scopes: ScopeSet,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// When the resource owner authenticated
    pub auth_time: Option<DateTime<Utc>>,
    /// Revoked (explicitly or by rotation)
    pub revoked: bool,
    /// Revocation time
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Signing key as stored at rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSigningKey {
    /// Key id placed in the JWT header
    pub kid: String,
    /// JWS algorithm
    pub algorithm: String,
    /// AES-256-GCM encrypted PKCS#8 PEM, base64
    pub encrypted_private_key: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When it stopped being the signing key
    pub retired_at: Option<DateTime<Utc>>,
}
