// ABOUTME: Integration tests for the background sweeper
// ABOUTME: Expired codes, device authorizations, stale refresh tokens, and denylist entries are pruned
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{
    authorize_request, create_test_context, create_user, issue_code, public_registration,
    register, REDIRECT_URI, VERIFIER,
};
use oidc_provider::database_plugins::DatabaseProvider;
use oidc_provider::errors::{FlowError, GrantError};
use oidc_provider::oauth2_server::models::{ClientCredentials, TokenRequest};
use oidc_provider::oauth2_server::sweeper::sweep_once;
use tokio::sync::watch;
use tokio::time::timeout;

fn public_caller() -> Option<ClientCredentials> {
    Some(ClientCredentials {
        client_id: "c1".to_owned(),
        client_secret: None,
    })
}

fn code_request(code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".to_owned()),
        code: Some(code.to_owned()),
        redirect_uri: Some(REDIRECT_URI.to_owned()),
        code_verifier: Some(VERIFIER.to_owned()),
        ..TokenRequest::default()
    }
}

#[tokio::test]
async fn test_sweep_removes_only_expired_authorizations() {
    let context = create_test_context().await;
    register(&context, public_registration("c1")).await;
    let subject_id = create_user(&context, "alice").await;
    let start = Utc::now();
    let device_lifetime = Duration::seconds(context.config().lifetimes.device_code_secs);

    let stale_code = issue_code(&context, &authorize_request("c1", "openid"), &subject_id, start).await;
    context
        .flows()
        .start_device_authorization(public_caller(), Some("openid"), start)
        .await
        .unwrap();

    let sweep_at = start + device_lifetime + Duration::seconds(1);
    let fresh_code =
        issue_code(&context, &authorize_request("c1", "openid"), &subject_id, sweep_at).await;

    let report = context.sweeper().sweep(sweep_at).await;
    assert_eq!(report.authorization_codes, 1);
    assert_eq!(report.device_authorizations, 1);
    assert!(!report.key_rotated);
    assert!(report.failed_steps.is_empty());

    let error = context
        .flows()
        .exchange(&code_request(&stale_code), public_caller(), sweep_at)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Grant(GrantError::CodeNotFound)));

    context
        .flows()
        .exchange(&code_request(&fresh_code), public_caller(), sweep_at)
        .await
        .unwrap();

    // A second pass finds nothing left to do
    let report = context.sweeper().sweep(sweep_at).await;
    assert_eq!(report.removed(), 0);
}

#[tokio::test]
async fn test_sweep_prunes_revoked_refresh_tokens_after_retention() {
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
    let tokens = context
        .flows()
        .exchange(&code_request(&code), public_caller(), now)
        .await
        .unwrap();
    let refresh = tokens.refresh_token.unwrap();
    context
        .flows()
        .revoke(public_caller(), &refresh.value, now)
        .await
        .unwrap();
    context
        .flows()
        .revoke(public_caller(), &tokens.access_token.value, now)
        .await
        .unwrap();

    // Inside the retention window the revoked record stays for replay detection
    let report = context.sweeper().sweep(now + Duration::seconds(3601)).await;
    assert_eq!(report.refresh_tokens, 0);
    assert_eq!(report.access_token_revocations, 1);
    assert!(context
        .database()
        .get_refresh_token(&refresh.token_id)
        .await
        .unwrap()
        .is_some());

    let retention = Duration::seconds(context.config().sweeper.revoked_retention_secs);
    let report = context
        .sweeper()
        .sweep(now + retention + Duration::seconds(1))
        .await;
    assert_eq!(report.refresh_tokens, 1);
    assert!(context
        .database()
        .get_refresh_token(&refresh.token_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_sweep_once_reports_success() {
    let context = create_test_context().await;
    let report = sweep_once(&context.sweeper()).await.unwrap();
    assert_eq!(report.removed(), 0);
    assert!(!report.key_rotated);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let context = create_test_context().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = context.sweeper();
    let task = tokio::spawn(async move {
        sweeper
            .run(StdDuration::from_secs(3600), shutdown_rx)
            .await;
    });

    shutdown_tx.send(true).unwrap();
    timeout(StdDuration::from_secs(5), task)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
