// ABOUTME: In-flight authorization state for the code and device flows
// ABOUTME: Single-use authorization requests, device authorizations, and consume/poll outcomes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::client::ScopeSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of an approved `/authorize` request, before a code is assigned
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Requesting client
    pub client_id: String,
    /// Authenticated resource owner
    pub subject_id: String,
    /// Granted scopes
    pub scopes: ScopeSet,
    /// Redirect URI the code is bound to
    pub redirect_uri: String,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE challenge method
    pub code_challenge_method: Option<String>,
    /// OIDC nonce echoed into the identity token
    pub nonce: Option<String>,
    /// When the resource owner authenticated
    pub auth_time: DateTime<Utc>,
}

/// Stored authorization code (single use)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Opaque code, primary key
    pub code: String,
    /// Links the code with every token minted from it
    pub authorization_id: String,
    /// Requesting client
    pub client_id: String,
    /// Resource owner
    pub subject_id: String,
    /// Granted scopes
    pub requested_scopes: ScopeSet,
    /// Redirect URI the code is bound to
    pub redirect_uri: String,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE challenge method
    pub code_challenge_method: Option<String>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// When the resource owner authenticated
    pub auth_time: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last instant at which the code can be exchanged (inclusive)
    pub expires_at: DateTime<Utc>,
    /// Set by the first successful exchange, never cleared
    pub consumed: bool,
}

/// Result of an atomic check-and-mark on a single-use record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome<T> {
    /// This caller won the race and owns the record
    Consumed(T),
    /// Lifetime elapsed before consumption
    Expired,
    /// Someone already consumed it; carries the record for replay handling
    AlreadyConsumed(T),
    /// Never existed or has been swept
    NotFound,
}

/// Device authorization status; terminal states never change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Waiting for the user
    Pending,
    /// User approved
    Approved,
    /// User denied
    Denied,
    /// Lifetime elapsed while pending
    Expired,
}

impl DeviceStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether no further transition is allowed
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Stored device authorization (RFC 8628)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    /// Secret code held by the device, primary key
    pub device_code: String,
    /// Short code typed by the user
    pub user_code: String,
    /// Links the device code with every token minted from it
    pub authorization_id: String,
    /// Requesting client
    pub client_id: String,
    /// Requested scopes
    pub scopes: ScopeSet,
    /// Current status
    pub status: DeviceStatus,
    /// Resource owner, set on approval
    pub subject_id: Option<String>,
    /// When the approving user authenticated
    pub auth_time: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last instant at which the device code is usable (inclusive)
    pub expires_at: DateTime<Utc>,
    /// Minimum seconds between polls; grows on `slow_down`
    pub poll_interval_secs: i64,
    /// Last poll time
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Set once tokens were issued for this device code
    pub consumed: bool,
}

/// Outcome of one device poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePoll {
    /// Still pending
    Pending,
    /// Polled faster than the interval; interval was raised
    SlowDown,
    /// User denied
    Denied,
    /// Lifetime elapsed
    Expired,
    /// Approved and consumed by this caller
    Approved(DeviceAuthorization),
    /// Tokens were already issued for this device code
    AlreadyConsumed,
    /// Unknown device code, or it belongs to another client
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_terminality() {
        assert!(!DeviceStatus::Pending.is_terminal());
        for status in [
            DeviceStatus::Approved,
            DeviceStatus::Denied,
            DeviceStatus::Expired,
        ] {
            assert!(status.is_terminal());
            assert_eq!(DeviceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeviceStatus::parse("revoked"), None);
    }
}
