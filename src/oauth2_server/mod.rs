// ABOUTME: OpenID Connect authorization server: registry, sessions, issuance, validation, and flows
// ABOUTME: Exposes the grant flow controller and its axum routes plus the background sweeper
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Client registry with Argon2id secrets and exact-match redirect URIs
pub mod client_registration;
/// Compact JWE encryption of identity tokens
pub mod encryption;
/// HTTP helpers shared by the endpoint handlers
pub mod endpoints;
/// Grant flow controller (authorization code, device, refresh, password)
pub mod flows;
/// Resource owner authentication
pub mod identity;
/// Token issuer (access, refresh, identity, and session tokens)
pub mod issuer;
/// RSA signing keys, JWKS, and rotation
pub mod keys;
/// Request and response types of the endpoints
pub mod models;
/// RFC 7636 proof key verification
pub mod pkce;
/// Rate limiting for credential-bearing endpoints
pub mod rate_limiting;
/// Axum routes
pub mod routes;
/// Authorization code and device authorization store
pub mod sessions;
/// Revocation and pruning sweeper
pub mod sweeper;
/// Token validator
pub mod validator;

pub use client_registration::{ClientRegistration, ClientRegistry, RegisteredClient};
pub use flows::{AuthorizeRejection, GrantFlowController, ValidatedAuthorization};
pub use identity::{DatabaseIdentityProvider, IdentityProvider, NewUser};
pub use issuer::{GrantContext, TokenIssuer, TokenSet};
pub use keys::{JsonWebKey, JsonWebKeySet, KeyRing, SigningKey};
pub use rate_limiting::OAuth2RateLimiter;
pub use routes::OidcRoutes;
pub use sessions::AuthorizationSessionStore;
pub use sweeper::{SweepReport, Sweeper};
pub use validator::TokenValidator;
