// ABOUTME: HTTP integration tests for the provider routes through the full middleware stack
// ABOUTME: Login, authorize, token, userinfo, introspection, revocation, device verification, logout, discovery, JWKS
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use axum::http::StatusCode;
use axum::Router;
use chrono::Utc;
use common::{
    authorize_request, client_private_key, create_test_context, create_test_context_with,
    create_user, encrypted_registration, issue_code, public_registration, register, test_config,
    LOGOUT_REDIRECT_URI, PASSWORD, REDIRECT_URI, VERIFIER,
};
use helpers::axum_test::{query_param, AxumTestRequest};
use oidc_provider::config::environment::DEFAULT_ISSUER;
use oidc_provider::models::ConsentType;
use oidc_provider::oauth2_server::encryption::decrypt;
use oidc_provider::oauth2_server::models::{
    ConsentPage, DeviceAuthorizationResponse, DiscoveryDocument, IntrospectionResponse,
    TokenResponse, UserInfo, VerifyResponse,
};
use oidc_provider::server::{build_router, ServerContext};
use serde_json::Value;
use std::sync::Arc;

async fn setup() -> (Arc<ServerContext>, Router) {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    create_user(&context, "alice").await;
    let router = build_router(context.clone());
    (context, router)
}

fn authorize_uri(client_id: &str, scope: &str) -> String {
    let query = serde_urlencoded::to_string(authorize_request(client_id, scope)).unwrap();
    format!("/connect/authorize?{query}")
}

/// Log in and return the `Cookie` header value
async fn login(router: &Router) -> String {
    AxumTestRequest::post("/connect/login")
        .form(&[("username", "alice"), ("password", PASSWORD)])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .cookie()
}

/// Log in, authorize, and return the issued code
async fn obtain_code(router: &Router, scope: &str) -> String {
    let cookie = login(router).await;
    let response = AxumTestRequest::get(&authorize_uri("c1", scope))
        .header("cookie", &cookie)
        .send(router.clone())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    let location = response.location();
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(location, "state").as_deref(), Some("xyz"));
    query_param(location, "code").unwrap()
}

async fn redeem(router: &Router, code: &str) -> TokenResponse {
    let response = AxumTestRequest::post("/connect/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
            ("client_id", "c1"),
        ])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(response.header("cache-control"), Some("no-store"));
    response.json()
}

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let (_context, router) = setup().await;

    let response = AxumTestRequest::get(&authorize_uri("c1", "openid"))
        .send(router.clone())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    let location = response.location();
    assert!(location.starts_with("/connect/login?"));
    let return_url = query_param(location, "return_url").unwrap();
    assert!(return_url.starts_with("/connect/authorize?"));

    // Logging in with the return URL resumes the authorization request
    let login = AxumTestRequest::post("/connect/login")
        .form(&[
            ("username", "alice"),
            ("password", PASSWORD),
            ("return_url", return_url.as_str()),
        ])
        .send(router.clone())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert_eq!(login.location(), return_url);
    let cookie = login.cookie();
    assert!(cookie.starts_with("oidc_session="));

    let resumed = AxumTestRequest::get(&return_url)
        .header("cookie", &cookie)
        .send(router)
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert!(query_param(resumed.location(), "code").is_some());
}

#[tokio::test]
async fn test_login_rejects_bad_password_and_foreign_return_url() {
    let (_context, router) = setup().await;

    AxumTestRequest::post("/connect/login")
        .form(&[("username", "alice"), ("password", "wrong")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = AxumTestRequest::post("/connect/login")
        .form(&[
            ("username", "alice"),
            ("password", PASSWORD),
            ("return_url", "https://evil.example.com/"),
        ])
        .send(router)
        .await
        .assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "logged_in");
}

#[tokio::test]
async fn test_prompt_none_without_session() {
    let (_context, router) = setup().await;
    let uri = format!("{}&prompt=none", authorize_uri("c1", "openid"));

    let response = AxumTestRequest::get(&uri)
        .send(router)
        .await
        .assert_status(StatusCode::SEE_OTHER);
    let location = response.location();
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(location, "error").as_deref(), Some("login_required"));
    assert_eq!(query_param(location, "state").as_deref(), Some("xyz"));
}

#[tokio::test]
async fn test_untrusted_redirect_uri_is_not_followed() {
    let (_context, router) = setup().await;
    let mut request = authorize_request("c1", "openid");
    request.redirect_uri = Some("https://evil.example.com/cb".to_owned());
    let uri = format!(
        "/connect/authorize?{}",
        serde_urlencoded::to_string(request).unwrap()
    );

    let response = AxumTestRequest::get(&uri)
        .send(router)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert!(response.header("location").is_none());
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_code_flow_over_http() {
    let (_context, router) = setup().await;
    let code = obtain_code(&router, "openid email offline_access").await;
    let tokens = redeem(&router, &code).await;

    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 3600);
    assert!(tokens.refresh_token.is_some());
    assert!(tokens.id_token.is_some());

    let userinfo: UserInfo = AxumTestRequest::get("/connect/userinfo")
        .header("authorization", &format!("Bearer {}", tokens.access_token))
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(userinfo.sub, "sub-alice");
    assert_eq!(userinfo.email.as_deref(), Some("alice@example.com"));
    assert!(userinfo.name.is_none());

    // Replaying the code is an invalid_grant
    let replay = AxumTestRequest::post("/connect/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
            ("client_id", "c1"),
        ])
        .send(router.clone())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    let body: Value = replay.json();
    assert_eq!(body["error"], "invalid_grant");

    // The replay revoked the refresh token minted from the code
    let refresh = AxumTestRequest::post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens.refresh_token.as_deref().unwrap()),
            ("client_id", "c1"),
        ])
        .send(router)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    let body: Value = refresh.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_endpoint_errors() {
    let (_context, router) = setup().await;

    let response = AxumTestRequest::post("/connect/token")
        .form(&[("grant_type", "authorization_code"), ("client_id", "nobody")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.header("www-authenticate").is_some());
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_client");

    let response = AxumTestRequest::post("/connect/token")
        .form(&[("grant_type", "client_credentials"), ("client_id", "c1")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");

    let response = AxumTestRequest::post("/connect/token")
        .form(&[("client_id", "c1")])
        .send(router)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_introspection_and_revocation() {
    let (context, router) = setup().await;
    register(&context, public_registration("c2")).await;
    let code = obtain_code(&router, "openid").await;
    let tokens = redeem(&router, &code).await;
    let access_token = tokens.access_token.as_str();

    let active: IntrospectionResponse = AxumTestRequest::post("/connect/introspect")
        .form(&[("token", access_token), ("client_id", "c1")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert!(active.active);
    assert_eq!(active.sub.as_deref(), Some("sub-alice"));
    assert_eq!(active.token_type.as_deref(), Some("access_token"));

    // Unrelated clients learn nothing
    let foreign: IntrospectionResponse = AxumTestRequest::post("/connect/introspect")
        .form(&[("token", access_token), ("client_id", "c2")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert!(!foreign.active);
    assert!(foreign.sub.is_none());

    AxumTestRequest::post("/connect/revoke")
        .form(&[
            ("token", access_token),
            ("token_type_hint", "access_token"),
            ("client_id", "c1"),
        ])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);

    let revoked: IntrospectionResponse = AxumTestRequest::post("/connect/introspect")
        .form(&[("token", access_token), ("client_id", "c1")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert!(!revoked.active);

    AxumTestRequest::get("/connect/userinfo")
        .header("authorization", &format!("Bearer {access_token}"))
        .send(router.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Unknown tokens are accepted silently
    AxumTestRequest::post("/connect/revoke")
        .form(&[("token", "not-a-token"), ("client_id", "c1")])
        .send(router)
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_userinfo_requires_bearer_token() {
    let (_context, router) = setup().await;

    let response = AxumTestRequest::get("/connect/userinfo")
        .send(router.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.header("www-authenticate").is_some());

    AxumTestRequest::get("/connect/userinfo")
        .header("authorization", "Bearer garbage")
        .send(router)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_explicit_consent() {
    let (context, router) = setup().await;
    let mut registration = public_registration("consenting");
    registration.consent_type = ConsentType::Explicit;
    registration.display_name = Some("Consenting App".to_owned());
    register(&context, registration).await;
    let cookie = login(&router).await;

    let page: ConsentPage = AxumTestRequest::get(&authorize_uri("consenting", "openid profile"))
        .header("cookie", &cookie)
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(page.application_name, "Consenting App");
    assert_eq!(page.scope, "openid profile");

    let mut request = authorize_request("consenting", "openid profile");
    request.decision = Some("deny".to_owned());
    let denied = AxumTestRequest::post("/connect/authorize")
        .header("cookie", &cookie)
        .form(&request)
        .send(router.clone())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert_eq!(
        query_param(denied.location(), "error").as_deref(),
        Some("access_denied")
    );

    request.decision = Some("accept".to_owned());
    let accepted = AxumTestRequest::post("/connect/authorize")
        .header("cookie", &cookie)
        .form(&request)
        .send(router)
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert!(query_param(accepted.location(), "code").is_some());
}

#[tokio::test]
async fn test_device_flow_over_http() {
    let (_context, router) = setup().await;

    let device: DeviceAuthorizationResponse = AxumTestRequest::post("/connect/device")
        .form(&[("client_id", "c1"), ("scope", "openid")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(device.interval, 5);
    assert_eq!(device.expires_in, 900);
    assert!(device
        .verification_uri_complete
        .ends_with(&format!("user_code={}", device.user_code)));

    let pending = AxumTestRequest::post("/connect/token")
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("device_code", device.device_code.as_str()),
            ("client_id", "c1"),
        ])
        .send(router.clone())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    let body: Value = pending.json();
    assert_eq!(body["error"], "authorization_pending");

    // Verification needs a login session
    let verify_uri = format!("/connect/verify?user_code={}", device.user_code);
    let response = AxumTestRequest::get(&verify_uri)
        .send(router.clone())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert!(response.location().starts_with("/connect/login?"));

    let cookie = login(&router).await;
    let page: ConsentPage = AxumTestRequest::get(&verify_uri)
        .header("cookie", &cookie)
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(page.user_code.as_deref(), Some(device.user_code.as_str()));

    let verdict: VerifyResponse = AxumTestRequest::post("/connect/verify")
        .header("cookie", &cookie)
        .form(&[
            ("user_code", device.user_code.to_lowercase().as_str()),
            ("decision", "accept"),
        ])
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(verdict.status, "approved");

    let tokens: TokenResponse = AxumTestRequest::post("/connect/token")
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("device_code", device.device_code.as_str()),
            ("client_id", "c1"),
        ])
        .send(router)
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert!(tokens.id_token.is_some());
}

#[tokio::test]
async fn test_logout() {
    let (_context, router) = setup().await;
    let code = obtain_code(&router, "openid").await;
    let id_token = redeem(&router, &code).await.id_token.unwrap();

    let uri = format!(
        "/connect/logout?id_token_hint={id_token}&post_logout_redirect_uri={}&state=bye",
        urlencoding::encode(LOGOUT_REDIRECT_URI)
    );
    let response = AxumTestRequest::get(&uri)
        .send(router.clone())
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert!(response.location().starts_with(LOGOUT_REDIRECT_URI));
    assert_eq!(query_param(response.location(), "state").as_deref(), Some("bye"));
    assert!(response.header("set-cookie").unwrap().contains("Max-Age=0"));

    // Unregistered targets are never followed
    let uri = format!(
        "/connect/logout?id_token_hint={id_token}&post_logout_redirect_uri={}",
        urlencoding::encode("https://evil.example.com/")
    );
    let response = AxumTestRequest::get(&uri)
        .send(router)
        .await
        .assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "logged_out");
}

#[tokio::test]
async fn test_logout_with_encrypted_identity_token() {
    let context = create_test_context().await;
    register(&context, encrypted_registration("sealed")).await;
    let subject_id = create_user(&context, "alice").await;
    let router = build_router(context.clone());
    let now = Utc::now();

    let code = issue_code(&context, &authorize_request("sealed", "openid"), &subject_id, now).await;
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
        ("code_verifier", VERIFIER),
        ("client_id", "sealed"),
    ];
    let tokens: TokenResponse = AxumTestRequest::post("/connect/token")
        .form(&form)
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK)
        .json();
    let encrypted = tokens.id_token.unwrap();

    // The provider cannot open a token sealed for the client
    let uri = format!(
        "/connect/logout?id_token_hint={encrypted}&post_logout_redirect_uri={}",
        urlencoding::encode(LOGOUT_REDIRECT_URI)
    );
    let response = AxumTestRequest::get(&uri)
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "logged_out");

    let signed = decrypt(&encrypted, client_private_key()).unwrap();
    let uri = format!(
        "/connect/logout?id_token_hint={signed}&post_logout_redirect_uri={}",
        urlencoding::encode(LOGOUT_REDIRECT_URI)
    );
    let response = AxumTestRequest::get(&uri)
        .send(router)
        .await
        .assert_status(StatusCode::SEE_OTHER);
    assert!(response.location().starts_with(LOGOUT_REDIRECT_URI));
}

#[tokio::test]
async fn test_discovery_document() {
    let (_context, router) = setup().await;

    let document: DiscoveryDocument = AxumTestRequest::get("/.well-known/openid-configuration")
        .send(router)
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(document.issuer, DEFAULT_ISSUER);
    assert_eq!(
        document.token_endpoint,
        format!("{DEFAULT_ISSUER}/connect/token")
    );
    assert_eq!(document.code_challenge_methods_supported, vec!["S256"]);
    assert_eq!(
        document.id_token_encryption_alg_values_supported,
        vec!["RSA-OAEP-256"]
    );
    assert_eq!(document.id_token_encryption_enc_values_supported, vec!["A256GCM"]);
    assert!(document
        .grant_types_supported
        .contains(&"urn:ietf:params:oauth:grant-type:device_code".to_owned()));
    assert!(document.scopes_supported.contains(&"offline_access".to_owned()));
}

#[tokio::test]
async fn test_jwks_etag() {
    let (_context, router) = setup().await;

    let response = AxumTestRequest::get("/.well-known/jwks.json")
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);
    let etag = response.header("etag").unwrap().to_owned();
    let jwks: Value = response.json();
    let key = &jwks["keys"][0];
    assert_eq!(key["kty"], "RSA");
    assert_eq!(key["use"], "sig");
    assert_eq!(key["alg"], "RS256");

    AxumTestRequest::get("/.well-known/jwks.json")
        .header("if-none-match", &etag)
        .send(router)
        .await
        .assert_status(StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_health() {
    let (_context, router) = setup().await;
    let body: Value = AxumTestRequest::get("/health")
        .send(router)
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_rate_limit_on_token_endpoint() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_window = 2;
    let context = create_test_context_with(config).await;
    let router = build_router(context);

    for _ in 0..2 {
        let response = AxumTestRequest::post("/connect/token")
            .form(&[("grant_type", "password")])
            .send(router.clone())
            .await;
        // No client credentials, so the request itself fails authentication
        assert_eq!(response.status(), 401);
        assert!(response.header("x-ratelimit-remaining").is_some());
    }

    let limited = AxumTestRequest::post("/connect/token")
        .form(&[("grant_type", "password")])
        .send(router.clone())
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.header("retry-after").is_some());

    // Discovery is not limited
    AxumTestRequest::get("/.well-known/openid-configuration")
        .send(router)
        .await
        .assert_status(StatusCode::OK);
}
