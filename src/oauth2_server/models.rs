// ABOUTME: OAuth 2.0 / OpenID Connect request and response wire structures
// ABOUTME: Authorization, token, device, introspection, revocation, userinfo, and discovery payloads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde::{Deserialize, Serialize};

use crate::models::{DeviceAuthorization, ScopeSet, Subject};
use crate::oauth2_server::issuer::TokenSet;

/// Authorization request (`GET` query or `POST` form of `/connect/authorize`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeRequest {
    /// Response type, only `code` is supported
    pub response_type: Option<String>,
    /// Client identifier
    pub client_id: Option<String>,
    /// Redirect URI for the response
    pub redirect_uri: Option<String>,
    /// Requested scopes
    pub scope: Option<String>,
    /// Opaque client state echoed back
    pub state: Option<String>,
    /// PKCE code challenge (RFC 7636)
    pub code_challenge: Option<String>,
    /// PKCE code challenge method, only `S256`
    pub code_challenge_method: Option<String>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// `none`, `login`, or `consent`
    pub prompt: Option<String>,
    /// Consent decision posted back: `accept` or `deny`
    pub decision: Option<String>,
}

/// Token request form (`/connect/token`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// Grant type
    pub grant_type: Option<String>,
    /// Authorization code
    pub code: Option<String>,
    /// Redirect URI the code was bound to
    pub redirect_uri: Option<String>,
    /// PKCE code verifier
    pub code_verifier: Option<String>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Device code
    pub device_code: Option<String>,
    /// Resource owner username (password grant)
    pub username: Option<String>,
    /// Resource owner password (password grant)
    pub password: Option<String>,
    /// Requested scopes
    pub scope: Option<String>,
    /// Client identifier (`client_secret_post` or public clients)
    pub client_id: Option<String>,
    /// Client secret (`client_secret_post`)
    pub client_secret: Option<String>,
}

/// Authenticated caller at a client-authenticated endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client identifier
    pub client_id: String,
    /// Client secret, absent for public clients
    pub client_secret: Option<String>,
}

/// Successful token response (RFC 6749 Section 5.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token (JWT)
    pub access_token: String,
    /// Token type (always "Bearer")
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Rotating refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// OIDC identity token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Granted scopes
    pub scope: String,
}

impl From<TokenSet> for TokenResponse {
    fn from(tokens: TokenSet) -> Self {
        Self {
            expires_in: tokens.access_token.expires_in(),
            scope: tokens.access_token.scopes.to_string(),
            access_token: tokens.access_token.value,
            token_type: "Bearer".to_owned(),
            refresh_token: tokens.refresh_token.map(|token| token.value),
            id_token: tokens.id_token.map(|token| token.value),
        }
    }
}

/// Device authorization request form (`/connect/device`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceAuthorizationRequest {
    /// Requested scopes
    pub scope: Option<String>,
    /// Client identifier
    pub client_id: Option<String>,
    /// Client secret
    pub client_secret: Option<String>,
}

/// Device authorization response (RFC 8628 Section 3.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorizationResponse {
    /// Secret polled with by the device
    pub device_code: String,
    /// Short code the user types
    pub user_code: String,
    /// Where the user types it
    pub verification_uri: String,
    /// Verification URI with the user code pre-filled
    pub verification_uri_complete: String,
    /// Seconds until the codes expire
    pub expires_in: i64,
    /// Minimum polling interval in seconds
    pub interval: i64,
}

impl DeviceAuthorizationResponse {
    /// Response for a freshly stored device authorization
    #[must_use]
    pub fn new(device: DeviceAuthorization, verification_uri: String) -> Self {
        Self {
            verification_uri_complete: format!(
                "{verification_uri}?user_code={}",
                urlencoding::encode(&device.user_code)
            ),
            expires_in: (device.expires_at - device.created_at).num_seconds(),
            interval: device.poll_interval_secs,
            device_code: device.device_code,
            user_code: device.user_code,
            verification_uri,
        }
    }
}

/// Login form (`POST /connect/login`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    /// Login name
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Local path to continue with after login
    pub return_url: Option<String>,
}

/// Login query (`GET /connect/login`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginQuery {
    /// Local path to continue with after login
    pub return_url: Option<String>,
}

/// Descriptor of the login form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPage {
    /// Where to post credentials
    pub action: String,
    /// Path to continue with after login
    pub return_url: Option<String>,
}

/// Consent descriptor shown for explicit-consent clients and device verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentPage {
    /// Client display name
    pub application_name: String,
    /// Requested scopes
    pub scope: String,
    /// Device user code, when verifying a device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,
}

/// Verification form and query (`/connect/verify`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    /// User code as typed
    pub user_code: Option<String>,
    /// `accept` or `deny`
    pub decision: Option<String>,
}

/// Verification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// `approved` or `denied`
    pub status: String,
}

/// Logout request (RP-initiated logout)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    /// Identity token previously issued to the client
    pub id_token_hint: Option<String>,
    /// Registered logout redirect
    pub post_logout_redirect_uri: Option<String>,
    /// State echoed to the redirect
    pub state: Option<String>,
}

/// Introspection and revocation form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenLookupRequest {
    /// Token to inspect or revoke
    pub token: Option<String>,
    /// `access_token` or `refresh_token`
    pub token_type_hint: Option<String>,
    /// Client identifier
    pub client_id: Option<String>,
    /// Client secret
    pub client_secret: Option<String>,
}

/// Introspection response (RFC 7662 Section 2.2)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is active
    pub active: bool,
    /// Granted scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audiences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Token id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// `access_token` or `refresh_token`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    /// `{ "active": false }`
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Userinfo response; claims released per granted scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    /// Subject
    pub sub: String,
    /// `email` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `email` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    /// `profile` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `profile` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// `profile` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// `profile` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// `roles` scope
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub role: Vec<String>,
}

impl UserInfo {
    /// Claims of `subject` released by `scopes`
    #[must_use]
    pub fn for_scopes(subject: Subject, scopes: &ScopeSet) -> Self {
        use crate::constants::scopes as names;

        let email = scopes.contains(names::EMAIL);
        let profile = scopes.contains(names::PROFILE);
        Self {
            sub: subject.subject_id,
            email: subject.email.filter(|_| email),
            email_verified: email.then_some(subject.email_verified),
            name: subject.name.filter(|_| profile),
            given_name: subject.given_name.filter(|_| profile),
            family_name: subject.family_name.filter(|_| profile),
            preferred_username: profile.then_some(subject.username),
            role: if scopes.contains(names::ROLES) {
                subject.roles
            } else {
                Vec::new()
            },
        }
    }
}

/// OpenID Provider metadata (`/.well-known/openid-configuration`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Device authorization endpoint
    pub device_authorization_endpoint: String,
    /// Userinfo endpoint
    pub userinfo_endpoint: String,
    /// Introspection endpoint
    pub introspection_endpoint: String,
    /// Revocation endpoint
    pub revocation_endpoint: String,
    /// End-session endpoint
    pub end_session_endpoint: String,
    /// JWKS URI
    pub jwks_uri: String,
    /// Supported scopes
    pub scopes_supported: Vec<String>,
    /// Supported response types
    pub response_types_supported: Vec<String>,
    /// Supported grant types
    pub grant_types_supported: Vec<String>,
    /// Supported subject types
    pub subject_types_supported: Vec<String>,
    /// Identity token signing algorithms
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Key management algorithms for encrypted identity tokens
    pub id_token_encryption_alg_values_supported: Vec<String>,
    /// Content encryption algorithms for encrypted identity tokens
    pub id_token_encryption_enc_values_supported: Vec<String>,
    /// Client authentication methods at the token endpoint
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// PKCE methods
    pub code_challenge_methods_supported: Vec<String>,
    /// Claims that can be released
    pub claims_supported: Vec<String>,
}
