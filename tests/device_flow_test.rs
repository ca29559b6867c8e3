// ABOUTME: Integration tests for the device authorization grant (RFC 8628)
// ABOUTME: Walks pending, slow_down, approval, denial, expiry, and single redemption of device codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, Utc};
use common::{create_test_context, create_user, public_registration, register};
use oidc_provider::errors::{ClientError, FlowError, GrantError};
use oidc_provider::models::{DeviceStatus, GrantType};
use oidc_provider::oauth2_server::models::{ClientCredentials, TokenRequest};

fn public_caller(client_id: &str) -> Option<ClientCredentials> {
    Some(ClientCredentials {
        client_id: client_id.to_owned(),
        client_secret: None,
    })
}

fn device_request(device_code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("urn:ietf:params:oauth:grant-type:device_code".to_owned()),
        device_code: Some(device_code.to_owned()),
        ..TokenRequest::default()
    }
}

#[tokio::test]
async fn test_device_flow_pending_slow_down_then_tokens() {
    let context = create_test_context().await;
    register(&context, public_registration("tv")).await;
    let subject_id = create_user(&context, "alice").await;
    let flows = context.flows();
    let start = Utc::now();

    let device = flows
        .start_device_authorization(public_caller("tv"), Some("openid offline_access"), start)
        .await
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Pending);
    assert_eq!(device.user_code.len(), 9);
    let interval = device.poll_interval_secs;

    let first = flows
        .exchange(&device_request(&device.device_code), public_caller("tv"), start)
        .await
        .unwrap_err();
    assert!(matches!(first, FlowError::AuthorizationPending));

    let too_soon = start + Duration::seconds(1);
    let error = flows
        .exchange(&device_request(&device.device_code), public_caller("tv"), too_soon)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::SlowDown));
    assert_eq!(error.oauth_error().error, "slow_down");

    let lookup = flows
        .sessions()
        .lookup_user_code(&device.user_code.to_lowercase().replace('-', ""))
        .await
        .unwrap()
        .unwrap();
    assert!(lookup.poll_interval_secs > interval);

    let approved_at = too_soon + Duration::seconds(2);
    assert!(flows
        .sessions()
        .approve_device(&device.user_code, &subject_id, approved_at, approved_at)
        .await
        .unwrap());

    let collect_at = too_soon + Duration::seconds(lookup.poll_interval_secs);
    let tokens = flows
        .exchange(&device_request(&device.device_code), public_caller("tv"), collect_at)
        .await
        .unwrap();
    assert_eq!(tokens.access_token.subject_id, subject_id);
    assert!(tokens.refresh_token.is_some());
    assert!(tokens.id_token.is_some());

    let again = collect_at + Duration::seconds(lookup.poll_interval_secs);
    let error = flows
        .exchange(&device_request(&device.device_code), public_caller("tv"), again)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Grant(GrantError::DeviceCodeConsumed)
    ));
}

#[tokio::test]
async fn test_denied_device_authorization() {
    let context = create_test_context().await;
    register(&context, public_registration("tv")).await;
    let flows = context.flows();
    let now = Utc::now();

    let device = flows
        .start_device_authorization(public_caller("tv"), Some("openid"), now)
        .await
        .unwrap();
    assert!(flows
        .sessions()
        .deny_device(&device.user_code, now)
        .await
        .unwrap());

    // Terminal states do not change
    assert!(!flows
        .sessions()
        .approve_device(&device.user_code, "sub-alice", now, now)
        .await
        .unwrap());

    let error = flows
        .exchange(&device_request(&device.device_code), public_caller("tv"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::AccessDenied));
    assert_eq!(error.oauth_error().error, "access_denied");
}

#[tokio::test]
async fn test_expired_device_code() {
    let context = create_test_context().await;
    register(&context, public_registration("tv")).await;
    let flows = context.flows();
    let now = Utc::now();

    let device = flows
        .start_device_authorization(public_caller("tv"), None, now)
        .await
        .unwrap();
    let expired = device.expires_at + Duration::seconds(1);

    assert!(!flows
        .sessions()
        .approve_device(&device.user_code, "sub-alice", expired, expired)
        .await
        .unwrap());

    let error = flows
        .exchange(&device_request(&device.device_code), public_caller("tv"), expired)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::ExpiredToken));
}

#[tokio::test]
async fn test_device_code_is_bound_to_its_client() {
    let context = create_test_context().await;
    register(&context, public_registration("tv")).await;
    register(&context, public_registration("other")).await;
    let flows = context.flows();
    let now = Utc::now();

    let device = flows
        .start_device_authorization(public_caller("tv"), Some("openid"), now)
        .await
        .unwrap();

    let error = flows
        .exchange(&device_request(&device.device_code), public_caller("other"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Grant(GrantError::DeviceCodeNotFound)
    ));

    let error = flows
        .exchange(&device_request("no-such-code"), public_caller("tv"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Grant(GrantError::DeviceCodeNotFound)
    ));
}

#[tokio::test]
async fn test_device_grant_requires_permission_and_known_scopes() {
    let context = create_test_context().await;
    let mut registration = public_registration("web");
    registration.allowed_grant_types.remove(&GrantType::DeviceCode);
    register(&context, registration).await;
    register(&context, public_registration("tv")).await;
    let flows = context.flows();
    let now = Utc::now();

    let error = flows
        .start_device_authorization(public_caller("web"), Some("openid"), now)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FlowError::Client(ClientError::GrantTypeNotAllowed { .. })
    ));

    let error = flows
        .start_device_authorization(public_caller("tv"), Some("openid admin"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::InvalidScope(_)));

    let error = flows
        .start_device_authorization(None, Some("openid"), now)
        .await
        .unwrap_err();
    assert!(matches!(error, FlowError::Client(ClientError::InvalidSecret)));
}

#[tokio::test]
async fn test_unknown_user_code_cannot_be_decided() {
    let context = create_test_context().await;
    let sessions = context.flows().sessions();
    let now = Utc::now();

    assert!(sessions.lookup_user_code("not a code").await.unwrap().is_none());
    assert!(!sessions.deny_device("BCDF-GHJK", now).await.unwrap());
}
