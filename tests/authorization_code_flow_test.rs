// ABOUTME: Integration tests for the authorization code flow with PKCE
// ABOUTME: Covers redemption, replay detection, concurrent consumption, expiry, and request validation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, Utc};
use common::{
    authorize_request, challenge, client_private_key, confidential_registration,
    create_test_context, create_user, encrypted_registration, issue_code, public_registration,
    register, REDIRECT_URI, VERIFIER,
};
use oidc_provider::database_plugins::DatabaseProvider;
use oidc_provider::errors::{ClientError, FlowError, GrantError, ValidationError};
use oidc_provider::models::{ConsumeOutcome, TokenUse};
use oidc_provider::oauth2_server::models::{ClientCredentials, TokenRequest};
use oidc_provider::oauth2_server::encryption::{decrypt, is_encrypted};
use oidc_provider::oauth2_server::AuthorizeRejection;

fn public_caller(client_id: &str) -> Option<ClientCredentials> {
    Some(ClientCredentials {
        client_id: client_id.to_owned(),
        client_secret: None,
    })
}

fn code_request(code: &str, verifier: Option<&str>) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".to_owned()),
        code: Some(code.to_owned()),
        redirect_uri: Some(REDIRECT_URI.to_owned()),
        code_verifier: verifier.map(str::to_owned),
        ..TokenRequest::default()
    }
}

#[tokio::test]
async fn test_code_exchange_issues_access_refresh_and_identity_tokens() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let request = authorize_request("c1", "openid profile offline_access");
    let code = issue_code(&context, &request, &subject_id, now).await;

    let tokens = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("c1"), now)
        .await
        .unwrap();

    let access = &tokens.access_token;
    assert_eq!(access.kind, TokenUse::AccessToken);
    assert_eq!(access.subject_id, subject_id);
    assert_eq!(access.client_id, "c1");
    assert_eq!(access.scopes.to_string(), "offline_access openid profile");
    assert!(tokens.refresh_token.is_some());
    assert!(tokens.id_token.is_some());

    let claims = context
        .flows()
        .validator()
        .validate(&access.value, "c1", now)
        .await
        .unwrap();
    assert_eq!(claims.sub, subject_id);
    assert_eq!(claims.token_use, TokenUse::AccessToken);
    assert_eq!(claims.iss, context.config().issuer());
}

#[tokio::test]
async fn test_no_refresh_token_without_offline_access() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let tokens = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("c1"), now)
        .await
        .unwrap();

    assert!(tokens.refresh_token.is_none());
    assert!(tokens.id_token.is_some());
}

#[tokio::test]
async fn test_no_identity_token_without_openid() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(
        &context,
        &authorize_request("c1", "dataEventRecords"),
        &subject_id,
        now,
    )
    .await;
    let tokens = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("c1"), now)
        .await
        .unwrap();

    assert!(tokens.id_token.is_none());
    let claims = context
        .flows()
        .validator()
        .validate(&tokens.access_token.value, "rs_dataEventRecordsApi", now)
        .await
        .unwrap();
    assert!(claims.has_audience("c1"));
}

#[tokio::test]
async fn test_code_replay_is_rejected_and_revokes_the_grant() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(
        &context,
        &authorize_request("c1", "openid offline_access"),
        &subject_id,
        now,
    )
    .await;
    let request = code_request(&code, Some(VERIFIER));
    let first = context
        .flows()
        .exchange(&request, public_caller("c1"), now)
        .await
        .unwrap();

    let replay = context
        .flows()
        .exchange(&request, public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        replay,
        FlowError::Grant(GrantError::CodeAlreadyConsumed)
    ));
    assert_eq!(replay.oauth_error().error, "invalid_grant");

    let refresh = first.refresh_token.unwrap();
    let record = context
        .database()
        .get_refresh_token(&refresh.token_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.revoked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumption_has_exactly_one_winner() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();
    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;

    let mut handles = Vec::new();
    for _ in 0..100 {
        let sessions = context.flows().sessions().clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            sessions.consume(&code, now).await.unwrap()
        }));
    }

    let mut consumed = 0;
    let mut already_consumed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ConsumeOutcome::Consumed(_) => consumed += 1,
            ConsumeOutcome::AlreadyConsumed(_) => already_consumed += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(consumed, 1);
    assert_eq!(already_consumed, 99);
}

#[tokio::test]
async fn test_code_expiry_boundary_is_inclusive() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let issued_at = Utc::now();
    let lifetime = Duration::seconds(context.config().lifetimes.authorization_code_secs);

    let on_time = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, issued_at).await;
    context
        .flows()
        .exchange(
            &code_request(&on_time, Some(VERIFIER)),
            public_caller("c1"),
            issued_at + lifetime,
        )
        .await
        .unwrap();

    let late = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, issued_at).await;
    let error = context
        .flows()
        .exchange(
            &code_request(&late, Some(VERIFIER)),
            public_caller("c1"),
            issued_at + lifetime + Duration::seconds(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Grant(GrantError::CodeExpired)));
}

#[tokio::test]
async fn test_pkce_verifier_is_checked() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let wrong = "x".repeat(43);
    let error = context
        .flows()
        .exchange(&code_request(&code, Some(&wrong)), public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Grant(GrantError::PkceMismatch)));

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let error = context
        .flows()
        .exchange(&code_request(&code, None), public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Grant(GrantError::PkceVerifierMissing)
    ));

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let error = context
        .flows()
        .exchange(&code_request(&code, Some("short")), public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Grant(GrantError::PkceVerifierMalformed)
    ));
}

#[tokio::test]
async fn test_code_is_bound_to_client_and_redirect_uri() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    register(&context, public_registration("c2")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let error = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("c2"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Grant(GrantError::ClientMismatch)));

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let request = TokenRequest {
        redirect_uri: Some("https://app.example.com/other".to_owned()),
        ..code_request(&code, Some(VERIFIER))
    };
    let error = context
        .flows()
        .exchange(&request, public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Grant(GrantError::RedirectUriMismatch)
    ));

    let error = context
        .flows()
        .exchange(&code_request("unknown-code", Some(VERIFIER)), public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Grant(GrantError::CodeNotFound)));
}

#[tokio::test]
async fn test_confidential_client_must_authenticate() {
    let context = create_test_context().await;
    register(&context, confidential_registration("web", "s3cret")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let mut request = authorize_request("web", "openid");
    request.code_challenge = None;
    request.code_challenge_method = None;
    let code = issue_code(&context, &request, &subject_id, now).await;

    let error = context
        .flows()
        .exchange(&code_request(&code, None), public_caller("web"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Client(ClientError::InvalidSecret)));
    assert_eq!(error.oauth_error().error, "invalid_client");

    let credentials = Some(ClientCredentials {
        client_id: "web".to_owned(),
        client_secret: Some("s3cret".to_owned()),
    });
    context
        .flows()
        .exchange(&code_request(&code, None), credentials, now)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_grant_type_and_missing_parameters() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let now = Utc::now();

    let request = TokenRequest {
        grant_type: Some("client_credentials".to_owned()),
        ..TokenRequest::default()
    };
    let error = context
        .flows()
        .exchange(&request, public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::UnsupportedGrantType(_)));

    let request = TokenRequest {
        grant_type: Some("authorization_code".to_owned()),
        ..TokenRequest::default()
    };
    let error = context
        .flows()
        .exchange(&request, public_caller("c1"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_authorization_request_rejections() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let flows = context.flows();

    // Untrusted client or redirect URI: answered directly
    let unknown_client = authorize_request("nobody", "openid");
    assert!(matches!(
        flows.validate_authorization(&unknown_client).await,
        Err(AuthorizeRejection::Direct(_))
    ));

    let mut wrong_redirect = authorize_request("c1", "openid");
    wrong_redirect.redirect_uri = Some("https://evil.example.com/cb".to_owned());
    assert!(matches!(
        flows.validate_authorization(&wrong_redirect).await,
        Err(AuthorizeRejection::Direct(_))
    ));

    // Trusted redirect URI: reported to the client with its state
    let mut token_response = authorize_request("c1", "openid");
    token_response.response_type = Some("token".to_owned());
    match flows.validate_authorization(&token_response).await {
        Err(AuthorizeRejection::Redirect {
            redirect_uri,
            state,
            error,
        }) => {
            assert_eq!(redirect_uri, REDIRECT_URI);
            assert_eq!(state.as_deref(), Some("xyz"));
            assert_eq!(error.error, "unsupported_response_type");
        }
        other => panic!("unexpected result {other:?}"),
    }

    let mut plain = authorize_request("c1", "openid");
    plain.code_challenge = Some(VERIFIER.to_owned());
    plain.code_challenge_method = Some("plain".to_owned());
    assert!(matches!(
        flows.validate_authorization(&plain).await,
        Err(AuthorizeRejection::Redirect { error, .. }) if error.error == "invalid_request"
    ));

    let mut no_method = authorize_request("c1", "openid");
    no_method.code_challenge_method = None;
    match flows.validate_authorization(&no_method).await {
        Err(AuthorizeRejection::Redirect { error, .. }) => {
            assert_eq!(error.error, "invalid_request");
            assert!(error
                .error_description
                .as_deref()
                .unwrap_or_default()
                .contains("code_challenge_method"));
        }
        other => panic!("unexpected result {other:?}"),
    }

    let mut no_challenge = authorize_request("c1", "openid");
    no_challenge.code_challenge = None;
    assert!(matches!(
        flows.validate_authorization(&no_challenge).await,
        Err(AuthorizeRejection::Redirect { error, .. }) if error.error == "invalid_request"
    ));

    let unknown_scope = authorize_request("c1", "openid admin");
    assert!(matches!(
        flows.validate_authorization(&unknown_scope).await,
        Err(AuthorizeRejection::Redirect { error, .. }) if error.error == "invalid_scope"
    ));

    let valid = flows
        .validate_authorization(&authorize_request("c1", "openid profile"))
        .await
        .unwrap();
    assert_eq!(valid.code_challenge.as_deref(), Some(challenge().as_str()));
    assert_eq!(valid.scopes.to_string(), "openid profile");
}

#[tokio::test]
async fn test_revoked_access_token_fails_validation() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let tokens = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("c1"), now)
        .await
        .unwrap();
    let access = tokens.access_token.value;

    context
        .flows()
        .revoke(public_caller("c1"), &access, now)
        .await
        .unwrap();
    assert_eq!(
        context
            .flows()
            .validator()
            .validate(&access, "c1", now)
            .await
            .unwrap_err(),
        ValidationError::Revoked
    );
}

#[tokio::test]
async fn test_identity_token_is_encrypted_for_clients_that_require_it() {
    let context = create_test_context().await;
    register(&context, encrypted_registration("sealed")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(
        &context,
        &authorize_request("sealed", "openid profile"),
        &subject_id,
        now,
    )
    .await;
    let tokens = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("sealed"), now)
        .await
        .unwrap();

    let id_token = tokens.id_token.unwrap();
    assert!(is_encrypted(&id_token.value));
    // Access tokens stay signed so resource servers can check them against the JWKS
    assert!(!is_encrypted(&tokens.access_token.value));

    let validator = context.flows().validator();
    assert_eq!(
        validator.verify_id_token_hint(&id_token.value).await.unwrap_err(),
        ValidationError::Malformed
    );

    let signed = decrypt(&id_token.value, client_private_key()).unwrap();
    let id_claims = validator.verify_id_token_hint(&signed).await.unwrap();
    assert_eq!(id_claims.sub, subject_id);
    assert_eq!(id_claims.azp, "sealed");
    assert_eq!(id_claims.aud, vec!["sealed".to_owned()]);
    assert_eq!(id_claims.preferred_username.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_plain_clients_keep_signed_identity_tokens() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let now = Utc::now();

    let code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, now).await;
    let tokens = context
        .flows()
        .exchange(&code_request(&code, Some(VERIFIER)), public_caller("c1"), now)
        .await
        .unwrap();
    let id_token = tokens.id_token.unwrap();
    assert!(!is_encrypted(&id_token.value));
    assert!(decrypt(&id_token.value, client_private_key()).is_err());
}
