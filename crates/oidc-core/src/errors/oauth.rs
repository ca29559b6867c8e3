// ABOUTME: OAuth 2.0 error taxonomy (client, grant, validation, flow) and RFC 6749 wire payload
// ABOUTME: Every protocol failure maps to exactly one standard error code and HTTP status

//! OAuth 2.0 protocol errors
//!
//! Internal variants carry enough detail for logs. Only [`OAuth2Error`] ever
//! reaches a caller, and it is built from fixed, generic descriptions.

use super::AppError;
#[cfg(feature = "http-response")]
use axum::response::{IntoResponse, Response};
#[cfg(feature = "http-response")]
use axum::Json;
#[cfg(feature = "http-response")]
use http::header::{HeaderValue, CACHE_CONTROL, PRAGMA, WWW_AUTHENTICATE};
#[cfg(feature = "http-response")]
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OAuth 2.0 error response body (RFC 6749 Section 5.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Error {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// URI for error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl OAuth2Error {
    fn with(error: &str, description: Option<&str>) -> Self {
        Self {
            error: error.to_owned(),
            error_description: description.map(str::to_owned),
            error_uri: None,
        }
    }

    /// Create an `invalid_request` error
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self::with("invalid_request", Some(description))
    }

    /// Create an `invalid_client` error
    #[must_use]
    pub fn invalid_client() -> Self {
        Self::with("invalid_client", Some("Client authentication failed"))
    }

    /// Create an `invalid_grant` error
    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self::with("invalid_grant", Some(description))
    }

    /// Create an `unauthorized_client` error
    #[must_use]
    pub fn unauthorized_client(description: &str) -> Self {
        Self::with("unauthorized_client", Some(description))
    }

    /// Create an `unsupported_grant_type` error
    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self::with(
            "unsupported_grant_type",
            Some("The grant type is not supported by this server"),
        )
    }

    /// Create an `unsupported_response_type` error
    #[must_use]
    pub fn unsupported_response_type() -> Self {
        Self::with(
            "unsupported_response_type",
            Some("Only the 'code' response type is supported"),
        )
    }

    /// Create an `invalid_scope` error
    #[must_use]
    pub fn invalid_scope(description: &str) -> Self {
        Self::with("invalid_scope", Some(description))
    }

    /// Create an `access_denied` error
    #[must_use]
    pub fn access_denied(description: &str) -> Self {
        Self::with("access_denied", Some(description))
    }

    /// Device flow: the user has not decided yet (RFC 8628 Section 3.5)
    #[must_use]
    pub fn authorization_pending() -> Self {
        Self::with(
            "authorization_pending",
            Some("The authorization request is still pending"),
        )
    }

    /// Device flow: polling faster than the allowed interval
    #[must_use]
    pub fn slow_down() -> Self {
        Self::with("slow_down", Some("Polling too frequently"))
    }

    /// Device flow: the device code lifetime elapsed
    #[must_use]
    pub fn expired_token() -> Self {
        Self::with("expired_token", Some("The device code has expired"))
    }

    /// Bearer token rejected (RFC 6750 Section 3.1)
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::with("invalid_token", Some("The token is invalid"))
    }

    /// `prompt=none` without an authenticated session
    #[must_use]
    pub fn login_required() -> Self {
        Self::with("login_required", Some("The user is not logged in"))
    }

    /// `prompt=none` for a client that needs interactive consent
    #[must_use]
    pub fn consent_required() -> Self {
        Self::with("consent_required", Some("User consent is required"))
    }

    /// Create a `server_error` error
    #[must_use]
    pub fn server_error() -> Self {
        Self::with(
            "server_error",
            Some("The server encountered an unexpected condition"),
        )
    }

    /// HTTP status used when this error is returned directly (not via redirect)
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.error.as_str() {
            "invalid_client" | "invalid_token" => 401,
            "server_error" => 500,
            _ => 400,
        }
    }
}

/// Client registry failures
#[derive(Debug, Error)]
pub enum ClientError {
    /// No client with this identifier
    #[error("client '{client_id}' is not registered")]
    NotFound {
        /// Client identifier that was looked up
        client_id: String,
    },
    /// Secret missing or did not verify
    #[error("client secret verification failed")]
    InvalidSecret,
    /// Registration contained an unacceptable redirect URI
    #[error("invalid redirect_uri '{uri}': {reason}")]
    InvalidRedirectUri {
        /// Offending URI
        uri: String,
        /// Why it was rejected
        reason: &'static str,
    },
    /// Request used a redirect URI that is not registered for the client
    #[error("redirect_uri '{uri}' is not registered for this client")]
    RedirectUriMismatch {
        /// Presented URI
        uri: String,
    },
    /// Client is not allowed to use this grant type
    #[error("grant type '{grant_type}' is not allowed for this client")]
    GrantTypeNotAllowed {
        /// Grant type requested
        grant_type: String,
    },
    /// Client asked for a scope outside its allowed set
    #[error("scope '{scope}' is not allowed for this client")]
    ScopeNotAllowed {
        /// Scope requested
        scope: String,
    },
    /// Registration used a client id that is already taken
    #[error("client '{client_id}' is already registered")]
    AlreadyRegistered {
        /// Conflicting identifier
        client_id: String,
    },
    /// Registration metadata is inconsistent
    #[error("invalid client metadata: {reason}")]
    InvalidMetadata {
        /// What is wrong
        reason: &'static str,
    },
    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] AppError),
}

impl ClientError {
    /// Standard error payload for this failure
    #[must_use]
    pub fn oauth_error(&self) -> OAuth2Error {
        match self {
            Self::NotFound { .. } | Self::InvalidSecret => OAuth2Error::invalid_client(),
            Self::InvalidRedirectUri { .. } => {
                OAuth2Error::invalid_request("The redirect_uri is not acceptable")
            }
            Self::RedirectUriMismatch { .. } => {
                OAuth2Error::invalid_request("The redirect_uri is not registered for this client")
            }
            Self::GrantTypeNotAllowed { .. } => OAuth2Error::unauthorized_client(
                "The client is not allowed to use this grant type",
            ),
            Self::ScopeNotAllowed { .. } => {
                OAuth2Error::invalid_scope("The client is not allowed to request this scope")
            }
            Self::AlreadyRegistered { .. } => {
                OAuth2Error::invalid_request("The client identifier is already in use")
            }
            Self::InvalidMetadata { .. } => {
                OAuth2Error::invalid_request("The client metadata is invalid")
            }
            Self::Storage(_) => OAuth2Error::server_error(),
        }
    }
}

/// Failures redeeming a grant (code, device code, refresh token, credentials)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrantError {
    /// Code was never issued or has been swept
    #[error("authorization code not found")]
    CodeNotFound,
    /// Code lifetime elapsed
    #[error("authorization code expired")]
    CodeExpired,
    /// Code was already exchanged
    #[error("authorization code already consumed")]
    CodeAlreadyConsumed,
    /// Code belongs to another client
    #[error("authorization code was issued to another client")]
    ClientMismatch,
    /// Token request redirect_uri differs from the authorization request
    #[error("redirect_uri does not match the authorization request")]
    RedirectUriMismatch,
    /// Challenge stored but no verifier presented
    #[error("code_verifier is required")]
    PkceVerifierMissing,
    /// Verifier violates RFC 7636 length or charset rules
    #[error("code_verifier is malformed")]
    PkceVerifierMalformed,
    /// Verifier does not hash to the stored challenge
    #[error("code_verifier does not match code_challenge")]
    PkceMismatch,
    /// Verifier presented although no challenge was stored
    #[error("code_verifier presented without a stored code_challenge")]
    PkceUnexpectedVerifier,
    /// Refresh token failed validation
    #[error("refresh token is invalid")]
    RefreshTokenInvalid,
    /// Refresh token was revoked or already rotated
    #[error("refresh token has been revoked")]
    RefreshTokenRevoked,
    /// Device code was never issued or has been swept
    #[error("device code not found")]
    DeviceCodeNotFound,
    /// Device code already redeemed
    #[error("device code already consumed")]
    DeviceCodeConsumed,
    /// Resource owner credentials rejected
    #[error("resource owner credentials are invalid")]
    InvalidCredentials,
    /// Requested scope is broader than the original grant
    #[error("requested scope '{scope}' exceeds the original grant")]
    ScopeWidened {
        /// Scope that was not part of the original grant
        scope: String,
    },
}

impl GrantError {
    /// Standard error payload for this failure
    #[must_use]
    pub fn oauth_error(&self) -> OAuth2Error {
        match self {
            Self::ScopeWidened { .. } => {
                OAuth2Error::invalid_scope("The requested scope exceeds the original grant")
            }
            Self::InvalidCredentials => {
                OAuth2Error::invalid_grant("The username or password is invalid")
            }
            Self::RefreshTokenInvalid | Self::RefreshTokenRevoked => {
                OAuth2Error::invalid_grant("The refresh token is invalid")
            }
            Self::DeviceCodeNotFound | Self::DeviceCodeConsumed => {
                OAuth2Error::invalid_grant("The device code is invalid")
            }
            _ => OAuth2Error::invalid_grant("The authorization code is invalid"),
        }
    }
}

/// Token validation failures, in check order
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Not a compact JWS, unsupported header, or claims do not parse
    #[error("token is malformed")]
    Malformed,
    /// Signature did not verify or the key id is unknown
    #[error("token signature is invalid")]
    InvalidSignature,
    /// Current time is past `exp`
    #[error("token has expired")]
    Expired,
    /// Expected audience not present in `aud`
    #[error("token audience does not match")]
    WrongAudience,
    /// Token was revoked before its natural expiry
    #[error("token has been revoked")]
    Revoked,
}

impl ValidationError {
    /// Generic payload for external callers; the specific check stays in logs
    #[must_use]
    pub fn oauth_error(&self) -> OAuth2Error {
        OAuth2Error::invalid_token()
    }
}

/// Terminal failure of a grant flow at the token endpoint
#[derive(Debug, Error)]
pub enum FlowError {
    /// Missing or malformed parameter
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// `grant_type` not recognised
    #[error("unsupported grant type '{0}'")]
    UnsupportedGrantType(String),
    /// Unknown scope value
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    /// Client authentication or permission failure
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Grant redemption failure
    #[error(transparent)]
    Grant(#[from] GrantError),
    /// Device flow: user has not decided yet
    #[error("authorization pending")]
    AuthorizationPending,
    /// Device flow: polling too fast
    #[error("slow down")]
    SlowDown,
    /// Device flow: user denied the request
    #[error("access denied")]
    AccessDenied,
    /// Device flow: device code lifetime elapsed
    #[error("device code expired")]
    ExpiredToken,
    /// Infrastructure failure after retries
    #[error(transparent)]
    Transient(#[from] AppError),
}

impl FlowError {
    /// Standard error payload for this failure
    #[must_use]
    pub fn oauth_error(&self) -> OAuth2Error {
        match self {
            Self::InvalidRequest(description) => OAuth2Error::invalid_request(description),
            Self::UnsupportedGrantType(_) => OAuth2Error::unsupported_grant_type(),
            Self::InvalidScope(_) => OAuth2Error::invalid_scope("The requested scope is invalid"),
            Self::Client(error) => error.oauth_error(),
            Self::Grant(error) => error.oauth_error(),
            Self::AuthorizationPending => OAuth2Error::authorization_pending(),
            Self::SlowDown => OAuth2Error::slow_down(),
            Self::AccessDenied => {
                OAuth2Error::access_denied("The user denied the authorization request")
            }
            Self::ExpiredToken => OAuth2Error::expired_token(),
            Self::Transient(_) => OAuth2Error::server_error(),
        }
    }
}

#[cfg(feature = "http-response")]
impl IntoResponse for OAuth2Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
        let challenge = match self.error.as_str() {
            "invalid_client" => Some(HeaderValue::from_static(r#"Basic realm="oidc""#)),
            "invalid_token" => Some(HeaderValue::from_static(
                r#"Bearer error="invalid_token""#,
            )),
            _ => None,
        };
        let mut response = (status, Json(self)).into_response();
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        if let Some(challenge) = challenge {
            headers.insert(WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

#[cfg(feature = "http-response")]
impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        match &self {
            Self::Transient(source) => {
                tracing::error!(error = %source, "Grant flow aborted by infrastructure failure");
            }
            Self::AuthorizationPending | Self::SlowDown => {
                tracing::debug!(outcome = %self, "Device flow poll");
            }
            _ => tracing::warn!(error = %self, "Grant flow rejected"),
        }
        self.oauth_error().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_indistinguishable_externally() {
        let payloads: Vec<OAuth2Error> = [
            ValidationError::Malformed,
            ValidationError::InvalidSignature,
            ValidationError::Expired,
            ValidationError::WrongAudience,
            ValidationError::Revoked,
        ]
        .iter()
        .map(ValidationError::oauth_error)
        .collect();

        assert!(payloads.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(payloads[0].error, "invalid_token");
        assert_eq!(payloads[0].http_status(), 401);
    }

    #[test]
    fn test_grant_errors_map_to_invalid_grant() {
        for error in [
            GrantError::CodeNotFound,
            GrantError::CodeExpired,
            GrantError::CodeAlreadyConsumed,
            GrantError::PkceMismatch,
            GrantError::RefreshTokenRevoked,
            GrantError::DeviceCodeConsumed,
        ] {
            let payload = error.oauth_error();
            assert_eq!(payload.error, "invalid_grant", "{error}");
            assert_eq!(payload.http_status(), 400);
        }

        let widened = GrantError::ScopeWidened {
            scope: "roles".to_owned(),
        };
        assert_eq!(widened.oauth_error().error, "invalid_scope");
    }

    #[test]
    fn test_flow_error_status_mapping() {
        let client = FlowError::Client(ClientError::InvalidSecret);
        assert_eq!(client.oauth_error().http_status(), 401);

        let transient = FlowError::Transient(AppError::database("disk I/O error"));
        let payload = transient.oauth_error();
        assert_eq!(payload.error, "server_error");
        assert_eq!(payload.http_status(), 500);
        assert!(!payload
            .error_description
            .unwrap_or_default()
            .contains("disk"));

        assert_eq!(FlowError::SlowDown.oauth_error().error, "slow_down");
        assert_eq!(
            FlowError::AuthorizationPending.oauth_error().error,
            "authorization_pending"
        );
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let json = serde_json::to_value(OAuth2Error::slow_down()).unwrap_or_default();
        assert_eq!(json["error"], "slow_down");
        assert!(json.get("error_uri").is_none());
    }
}
