// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides database, server context, client registration, user, and PKCE helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::panic
)]
//! Shared test utilities for `oidc_provider`
//!
//! Every context shares one pre-generated RSA key so tests do not pay for
//! key generation.

use std::collections::BTreeSet;
use std::env;
use std::sync::{Arc, Once, OnceLock};

use chrono::{DateTime, Utc};
use oidc_provider::config::ServerConfig;
use oidc_provider::database_plugins::{DatabaseProvider, SharedDatabase, SqliteDatabase};
use oidc_provider::key_management::MasterEncryptionKey;
use oidc_provider::models::{ClientType, ConsentType, GrantType, ScopeSet};
use oidc_provider::oauth2_server::client_registration::{ClientRegistration, RegisteredClient};
use oidc_provider::oauth2_server::identity::NewUser;
use oidc_provider::oauth2_server::models::AuthorizeRequest;
use oidc_provider::oauth2_server::pkce::compute_challenge;
use oidc_provider::oauth2_server::SigningKey;
use oidc_provider::server::ServerContext;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use tracing::Level;

static INIT_LOGGER: Once = Once::new();

/// Redirect URI registered for every test client
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
/// Post-logout redirect URI registered for every test client
pub const LOGOUT_REDIRECT_URI: &str = "https://app.example.com/signed-out";
/// Password of every test user
pub const PASSWORD: &str = "correct horse battery staple";
/// RFC 7636 Appendix B verifier
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => Level::TRACE,
            Ok("DEBUG") => Level::DEBUG,
            Ok("INFO") => Level::INFO,
            _ => Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// RSA key shared by every test in the process
pub fn test_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
}

/// Second RSA key for rotation tests
pub fn second_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
}

/// RSA key pair of clients that receive encrypted identity tokens
pub fn client_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
}

/// Standard test database setup
pub async fn create_test_database() -> SharedDatabase {
    init_test_logging();
    let database = SqliteDatabase::new("sqlite::memory:").await.unwrap();
    database.migrate().await.unwrap();
    Arc::new(database)
}

/// Configuration used by test contexts
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.rate_limit.enabled = false;
    config
}

/// Server context over a fresh in-memory database
pub async fn create_test_context() -> Arc<ServerContext> {
    create_test_context_with(test_config()).await
}

/// Server context with custom configuration
pub async fn create_test_context_with(config: ServerConfig) -> Arc<ServerContext> {
    let database = create_test_database().await;
    let master_key = Arc::new(MasterEncryptionKey::generate());
    store_signing_key(&database, &master_key, test_private_key(), Utc::now()).await;
    Arc::new(
        ServerContext::with_database(config, database, master_key)
            .await
            .unwrap(),
    )
}

/// Persist `private_key` as the current signing key
pub async fn store_signing_key(
    database: &SharedDatabase,
    master_key: &MasterEncryptionKey,
    private_key: &RsaPrivateKey,
    created_at: DateTime<Utc>,
) {
    let key = SigningKey::from_private_key(private_key, created_at).unwrap();
    database
        .store_signing_key(&key.to_stored(master_key).unwrap())
        .await
        .unwrap();
}

fn grants(grants: &[GrantType]) -> BTreeSet<GrantType> {
    grants.iter().copied().collect()
}

/// Public client allowed the authorization code, refresh, and device grants
pub fn public_registration(client_id: &str) -> ClientRegistration {
    ClientRegistration {
        client_id: Some(client_id.to_owned()),
        client_type: ClientType::Public,
        client_secret: None,
        display_name: Some(format!("{client_id} app")),
        allowed_grant_types: grants(&[
            GrantType::AuthorizationCode,
            GrantType::RefreshToken,
            GrantType::DeviceCode,
        ]),
        redirect_uris: BTreeSet::from([REDIRECT_URI.to_owned()]),
        post_logout_redirect_uris: BTreeSet::from([LOGOUT_REDIRECT_URI.to_owned()]),
        allowed_scopes: ScopeSet::parse("openid profile email offline_access dataEventRecords"),
        requires_pkce: true,
        consent_type: ConsentType::Implicit,
        access_token_lifetime_secs: None,
        requires_encryption: false,
        encryption_key: None,
    }
}

/// Confidential client allowed every grant
pub fn confidential_registration(client_id: &str, secret: &str) -> ClientRegistration {
    ClientRegistration {
        client_type: ClientType::Confidential,
        client_secret: Some(secret.to_owned()),
        allowed_grant_types: grants(&[
            GrantType::AuthorizationCode,
            GrantType::RefreshToken,
            GrantType::DeviceCode,
            GrantType::Password,
        ]),
        requires_pkce: false,
        ..public_registration(client_id)
    }
}

/// Public client whose identity tokens are encrypted to [`client_private_key`]
pub fn encrypted_registration(client_id: &str) -> ClientRegistration {
    let pem = client_private_key()
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    ClientRegistration {
        requires_encryption: true,
        encryption_key: Some(pem),
        ..public_registration(client_id)
    }
}

/// Register a client
pub async fn register(context: &ServerContext, registration: ClientRegistration) -> RegisteredClient {
    context
        .flows()
        .clients()
        .register(registration, Utc::now())
        .await
        .unwrap()
}

/// Create a user and return its subject id
pub async fn create_user(context: &ServerContext, username: &str) -> String {
    let subject_id = format!("sub-{username}");
    let created = context
        .users()
        .create_user(
            NewUser {
                subject_id: Some(subject_id.clone()),
                username: username.to_owned(),
                password: PASSWORD.to_owned(),
                email: Some(format!("{username}@example.com")),
                email_verified: true,
                name: Some(username.to_owned()),
                given_name: None,
                family_name: None,
                roles: vec!["user".to_owned()],
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(created);
    subject_id
}

/// S256 challenge of [`VERIFIER`]
pub fn challenge() -> String {
    compute_challenge(VERIFIER)
}

/// Authorization request for `client_id` with the standard PKCE challenge
pub fn authorize_request(client_id: &str, scope: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        response_type: Some("code".to_owned()),
        client_id: Some(client_id.to_owned()),
        redirect_uri: Some(REDIRECT_URI.to_owned()),
        scope: Some(scope.to_owned()),
        state: Some("xyz".to_owned()),
        code_challenge: Some(challenge()),
        code_challenge_method: Some("S256".to_owned()),
        nonce: Some("n-0S6_WzA2Mj".to_owned()),
        ..AuthorizeRequest::default()
    }
}

/// Validate `request` and issue a code for `subject_id`
pub async fn issue_code(
    context: &ServerContext,
    request: &AuthorizeRequest,
    subject_id: &str,
    now: DateTime<Utc>,
) -> String {
    let flows = context.flows();
    let Ok(authorization) = flows.validate_authorization(request).await else {
        panic!("authorization request rejected");
    };
    flows
        .issue_authorization_code(&authorization, subject_id, now, now)
        .await
        .unwrap()
        .code
}
