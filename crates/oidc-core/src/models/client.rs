// ABOUTME: Registered OAuth 2.0 client model with grant, redirect, and scope permissions
// ABOUTME: Includes the GrantType enum and the ScopeSet newtype used across all flows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::grant_types;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

/// OAuth 2.0 grant types supported by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code (with PKCE)
    AuthorizationCode,
    /// Refresh token rotation
    RefreshToken,
    /// Device authorization grant
    DeviceCode,
    /// Resource owner password credentials (legacy)
    Password,
}

impl GrantType {
    /// Wire name used in `grant_type` and discovery
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => grant_types::AUTHORIZATION_CODE,
            Self::RefreshToken => grant_types::REFRESH_TOKEN,
            Self::DeviceCode => grant_types::DEVICE_CODE,
            Self::Password => grant_types::PASSWORD,
        }
    }

    /// Parse a `grant_type` parameter; the device grant also accepts its short alias
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            grant_types::AUTHORIZATION_CODE => Some(Self::AuthorizationCode),
            grant_types::REFRESH_TOKEN => Some(Self::RefreshToken),
            grant_types::DEVICE_CODE | grant_types::DEVICE_CODE_ALIAS => Some(Self::DeviceCode),
            grant_types::PASSWORD => Some(Self::Password),
            _ => None,
        }
    }
}

impl Display for GrantType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the client can keep a secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Native, device, or browser apps without a secret
    Public,
    /// Server-side apps authenticating with a secret
    Confidential,
}

impl ClientType {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Confidential => "confidential",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "confidential" => Some(Self::Confidential),
            _ => None,
        }
    }
}

/// How the authorization endpoint obtains user consent for this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    /// First-party client, consent is implied
    #[default]
    Implicit,
    /// The user must accept the requested scopes
    Explicit,
}

impl ConsentType {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Implicit => "implicit",
            Self::Explicit => "explicit",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "implicit" => Some(Self::Implicit),
            "explicit" => Some(Self::Explicit),
            _ => None,
        }
    }
}

/// Ordered, de-duplicated set of scope values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Parse a space-delimited `scope` parameter (RFC 6749 Section 3.3)
    #[must_use]
    pub fn parse(value: &str) -> Self {
        Self(value.split_whitespace().map(str::to_owned).collect())
    }

    /// Whether the set contains `scope`
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Whether every scope in `self` is also in `other`
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// First scope of `self` that is not in `other`
    #[must_use]
    pub fn first_outside<'a>(&'a self, other: &'a Self) -> Option<&'a str> {
        self.0.difference(&other.0).next().map(String::as_str)
    }

    /// Scopes of `self` that also appear in `other`
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate scopes in lexical order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Display for ScopeSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Registered client application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Public identifier
    pub client_id: String,
    /// Public or confidential
    pub client_type: ClientType,
    /// Argon2 PHC hash of the secret (confidential clients only)
    pub secret_hash: Option<String>,
    /// Name shown on consent and verification pages
    pub display_name: Option<String>,
    /// Grants the token endpoint will accept from this client
    pub allowed_grant_types: BTreeSet<GrantType>,
    /// Exact-match redirect URIs for the authorization endpoint
    pub redirect_uris: BTreeSet<String>,
    /// Exact-match URIs for RP-initiated logout
    pub post_logout_redirect_uris: BTreeSet<String>,
    /// Scopes the client may request
    pub allowed_scopes: ScopeSet,
    /// Whether authorization requests must carry a PKCE challenge
    pub requires_pkce: bool,
    /// Consent behaviour at the authorization endpoint
    pub consent_type: ConsentType,
    /// Access token lifetime override
    pub access_token_lifetime_secs: Option<i64>,
    /// Whether identity tokens are returned as JWE addressed to `encryption_key`
    pub requires_encryption: bool,
    /// RSA public key (PEM `SubjectPublicKeyInfo`) for identity token encryption
    pub encryption_key: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last explicit update
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Whether the token endpoint accepts `grant_type` from this client
    #[must_use]
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    /// Exact string comparison (RFC 6749 Section 3.1.2.3)
    #[must_use]
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.contains(uri)
    }

    /// Exact string comparison against registered logout targets
    #[must_use]
    pub fn has_post_logout_redirect_uri(&self, uri: &str) -> bool {
        self.post_logout_redirect_uris.contains(uri)
    }

    /// Whether the client authenticates with a secret
    #[must_use]
    pub const fn is_confidential(&self) -> bool {
        matches!(self.client_type, ClientType::Confidential)
    }

    /// Name for consent screens, falling back to the client id
    #[must_use]
    pub fn application_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.client_id)
    }
}
