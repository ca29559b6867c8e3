// ABOUTME: Axum route handlers for the OpenID Connect provider endpoints
// ABOUTME: Authorization, token, device, verification, userinfo, introspection, revocation, login, logout, discovery
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Provider routes
//!
//! - `GET|POST /connect/authorize` - authorization code requests, login and consent
//! - `POST /connect/token` - every grant type
//! - `POST /connect/device` - device authorization
//! - `GET|POST /connect/verify` - user code lookup and decision
//! - `GET|POST /connect/userinfo` - claims for a bearer access token
//! - `POST /connect/introspect`, `POST /connect/revoke` - token lifecycle
//! - `GET|POST /connect/login`, `GET|POST /connect/logout` - login session
//! - `GET /.well-known/openid-configuration`, `GET /.well-known/jwks.json`

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::headers::authorization::{Basic, Bearer};
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use http::HeaderValue;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::constants::{encryption, endpoints, scopes};
use crate::errors::{AppError, OAuth2Error};
use crate::logging::AppLogger;
use crate::models::{ConsentType, GrantType};
use crate::oauth2_server::endpoints::{
    apply_no_store, authorize_return_url, clear_session_cookie, client_credentials,
    current_session, error_redirect, is_local_return_url, login_redirect, redirect_with_params,
    session_cookie, set_cookie,
};
use crate::oauth2_server::flows::AuthorizeRejection;
use crate::oauth2_server::encryption::is_encrypted;
use crate::oauth2_server::keys::SIGNING_ALGORITHM;
use crate::oauth2_server::models::{
    AuthorizeRequest, ConsentPage, DeviceAuthorizationRequest, DeviceAuthorizationResponse,
    DiscoveryDocument, LoginPage, LoginQuery, LoginRequest, LogoutRequest, TokenLookupRequest,
    TokenRequest, TokenResponse, UserInfo, VerifyRequest, VerifyResponse,
};
use crate::server::ServerContext;

type Context = State<Arc<ServerContext>>;
type BasicAuth = Option<TypedHeader<Authorization<Basic>>>;

/// Routes of the provider
pub struct OidcRoutes;

impl OidcRoutes {
    /// Build the provider router
    pub fn routes(context: Arc<ServerContext>) -> Router {
        Router::new()
            .route(
                endpoints::AUTHORIZE,
                get(Self::handle_authorize_get).post(Self::handle_authorize_post),
            )
            .route(endpoints::TOKEN, post(Self::handle_token))
            .route(endpoints::DEVICE, post(Self::handle_device))
            .route(
                endpoints::VERIFY,
                get(Self::handle_verify_get).post(Self::handle_verify_post),
            )
            .route(
                endpoints::USERINFO,
                get(Self::handle_userinfo).post(Self::handle_userinfo),
            )
            .route(endpoints::INTROSPECT, post(Self::handle_introspect))
            .route(endpoints::REVOKE, post(Self::handle_revoke))
            .route(
                endpoints::LOGIN,
                get(Self::handle_login_page).post(Self::handle_login),
            )
            .route(
                endpoints::LOGOUT,
                get(Self::handle_logout_get).post(Self::handle_logout_post),
            )
            .route(endpoints::DISCOVERY, get(Self::handle_discovery))
            .route(endpoints::JWKS, get(Self::handle_jwks))
            .route(endpoints::HEALTH_CHECK, get(Self::handle_health))
            .with_state(context)
    }

    // ================================
    // Authorization
    // ================================

    async fn handle_authorize_get(
        State(context): Context,
        headers: HeaderMap,
        Query(request): Query<AuthorizeRequest>,
    ) -> Response {
        Self::authorize(&context, &headers, request, false).await
    }

    async fn handle_authorize_post(
        State(context): Context,
        headers: HeaderMap,
        Form(request): Form<AuthorizeRequest>,
    ) -> Response {
        Self::authorize(&context, &headers, request, true).await
    }

    async fn authorize(
        context: &ServerContext,
        headers: &HeaderMap,
        request: AuthorizeRequest,
        accepts_decision: bool,
    ) -> Response {
        let now = Utc::now();
        let flows = context.flows();
        let authorization = match flows.validate_authorization(&request).await {
            Ok(authorization) => authorization,
            Err(AuthorizeRejection::Direct(error)) => {
                debug!(error = %error.error, "Authorization request rejected");
                return error.into_response();
            }
            Err(AuthorizeRejection::Redirect {
                redirect_uri,
                state,
                error,
            }) => return error_redirect(&redirect_uri, &error, state.as_deref()),
        };
        let redirect_error = |error: OAuth2Error| {
            error_redirect(
                &authorization.redirect_uri,
                &error,
                authorization.state.as_deref(),
            )
        };
        let prompt = authorization.prompt.as_deref().unwrap_or_default();

        let session = current_session(headers, flows.validator(), now).await;
        let session = match session {
            Some(session) if prompt != "login" => session,
            _ if prompt == "none" => return redirect_error(OAuth2Error::login_required()),
            _ => return login_redirect(&authorize_return_url(&request)),
        };

        if authorization.client.consent_type == ConsentType::Explicit {
            match request.decision.as_deref().filter(|_| accepts_decision) {
                Some("accept") => {}
                Some(_) => {
                    return redirect_error(OAuth2Error::access_denied(
                        "The user denied the authorization request",
                    ))
                }
                None if prompt == "none" => {
                    return redirect_error(OAuth2Error::consent_required())
                }
                None => {
                    return Json(ConsentPage {
                        application_name: authorization.client.application_name().to_owned(),
                        scope: authorization.scopes.to_string(),
                        user_code: None,
                    })
                    .into_response()
                }
            }
        }

        let auth_time = session
            .auth_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(now);
        match flows
            .issue_authorization_code(&authorization, &session.sub, auth_time, now)
            .await
        {
            Ok(code) => redirect_with_params(
                &authorization.redirect_uri,
                &[
                    ("code", Some(code.code.as_str())),
                    ("state", authorization.state.as_deref()),
                ],
            ),
            Err(e) => {
                error!(error = %e, "Failed to store authorization code");
                redirect_error(OAuth2Error::server_error())
            }
        }
    }

    // ================================
    // Token and device endpoints
    // ================================

    async fn handle_token(
        State(context): Context,
        basic: BasicAuth,
        Form(request): Form<TokenRequest>,
    ) -> Response {
        let credentials = match client_credentials(
            basic.as_ref().map(|TypedHeader(auth)| auth),
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        ) {
            Ok(credentials) => credentials,
            Err(error) => return error.into_response(),
        };

        match context
            .flows()
            .exchange(&request, credentials, Utc::now())
            .await
        {
            Ok(tokens) => {
                let mut response = Json(TokenResponse::from(tokens)).into_response();
                apply_no_store(response.headers_mut());
                response
            }
            Err(error) => error.into_response(),
        }
    }

    async fn handle_device(
        State(context): Context,
        basic: BasicAuth,
        Form(request): Form<DeviceAuthorizationRequest>,
    ) -> Response {
        let credentials = match client_credentials(
            basic.as_ref().map(|TypedHeader(auth)| auth),
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        ) {
            Ok(credentials) => credentials,
            Err(error) => return error.into_response(),
        };

        match context
            .flows()
            .start_device_authorization(credentials, request.scope.as_deref(), Utc::now())
            .await
        {
            Ok(device) => {
                let verification_uri = context.config().endpoint_url(endpoints::VERIFY);
                let mut response =
                    Json(DeviceAuthorizationResponse::new(device, verification_uri))
                        .into_response();
                apply_no_store(response.headers_mut());
                response
            }
            Err(error) => error.into_response(),
        }
    }

    // ================================
    // Device verification
    // ================================

    async fn handle_verify_get(
        State(context): Context,
        headers: HeaderMap,
        Query(request): Query<VerifyRequest>,
    ) -> Response {
        let now = Utc::now();
        let flows = context.flows();
        if current_session(&headers, flows.validator(), now).await.is_none() {
            let mut return_url = endpoints::VERIFY.to_owned();
            if let Some(user_code) = &request.user_code {
                return_url.push_str("?user_code=");
                return_url.push_str(&urlencoding::encode(user_code));
            }
            return login_redirect(&return_url);
        }

        let Some(user_code) = request.user_code.as_deref() else {
            return Json(ConsentPage {
                application_name: String::new(),
                scope: String::new(),
                user_code: None,
            })
            .into_response();
        };
        let device = match flows.sessions().lookup_user_code(user_code).await {
            Ok(Some(device)) if device.expires_at >= now && !device.status.is_terminal() => device,
            Ok(_) => {
                return OAuth2Error::invalid_request("The user code is invalid or expired")
                    .into_response()
            }
            Err(e) => return e.into_response(),
        };
        let application_name = match flows.clients().lookup(&device.client_id).await {
            Ok(client) => client.application_name().to_owned(),
            Err(e) => return e.oauth_error().into_response(),
        };
        Json(ConsentPage {
            application_name,
            scope: device.scopes.to_string(),
            user_code: Some(device.user_code),
        })
        .into_response()
    }

    async fn handle_verify_post(
        State(context): Context,
        headers: HeaderMap,
        Form(request): Form<VerifyRequest>,
    ) -> Response {
        let now = Utc::now();
        let flows = context.flows();
        let Some(session) = current_session(&headers, flows.validator(), now).await else {
            return AppError::auth_invalid("Login required").into_response();
        };
        let Some(user_code) = request.user_code.as_deref() else {
            return OAuth2Error::invalid_request("user_code is required").into_response();
        };

        let approve = request.decision.as_deref() == Some("accept");
        let auth_time = session
            .auth_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(now);
        let decided = if approve {
            flows
                .sessions()
                .approve_device(user_code, &session.sub, auth_time, now)
                .await
        } else {
            flows.sessions().deny_device(user_code, now).await
        };
        match decided {
            Ok(true) => Json(VerifyResponse {
                status: if approve { "approved" } else { "denied" }.to_owned(),
            })
            .into_response(),
            Ok(false) => OAuth2Error::invalid_request("The user code is invalid or expired")
                .into_response(),
            Err(e) => e.into_response(),
        }
    }

    // ================================
    // Userinfo, introspection, revocation
    // ================================

    async fn handle_userinfo(
        State(context): Context,
        bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ) -> Response {
        let Some(TypedHeader(bearer)) = bearer else {
            return OAuth2Error::invalid_token().into_response();
        };
        let flows = context.flows();
        let token_claims = match flows
            .validator()
            .validate_bearer(bearer.token(), Utc::now())
            .await
        {
            Ok(token_claims) => token_claims,
            Err(e) => return e.oauth_error().into_response(),
        };
        let granted = token_claims.scopes();
        if !granted.contains(scopes::OPENID) {
            debug!(client_id = %token_claims.client_id, "Userinfo without the openid scope");
            return OAuth2Error::invalid_token().into_response();
        }

        match flows.identity().find_subject(&token_claims.sub).await {
            Ok(Some(subject)) => Json(UserInfo::for_scopes(subject, &granted)).into_response(),
            Ok(None) => OAuth2Error::invalid_token().into_response(),
            Err(e) => e.into_response(),
        }
    }

    async fn handle_introspect(
        State(context): Context,
        basic: BasicAuth,
        Form(request): Form<TokenLookupRequest>,
    ) -> Response {
        let credentials = match client_credentials(
            basic.as_ref().map(|TypedHeader(auth)| auth),
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        ) {
            Ok(credentials) => credentials,
            Err(error) => return error.into_response(),
        };
        let Some(token) = request.token.as_deref().filter(|token| !token.is_empty()) else {
            return OAuth2Error::invalid_request("token is required").into_response();
        };

        match context
            .flows()
            .introspect(credentials, token, Utc::now())
            .await
        {
            Ok(introspection) => {
                let mut response = Json(introspection).into_response();
                apply_no_store(response.headers_mut());
                response
            }
            Err(error) => error.into_response(),
        }
    }

    async fn handle_revoke(
        State(context): Context,
        basic: BasicAuth,
        Form(request): Form<TokenLookupRequest>,
    ) -> Response {
        let credentials = match client_credentials(
            basic.as_ref().map(|TypedHeader(auth)| auth),
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        ) {
            Ok(credentials) => credentials,
            Err(error) => return error.into_response(),
        };
        let Some(token) = request.token.as_deref().filter(|token| !token.is_empty()) else {
            return OAuth2Error::invalid_request("token is required").into_response();
        };

        match context.flows().revoke(credentials, token, Utc::now()).await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(error) => error.into_response(),
        }
    }

    // ================================
    // Login session
    // ================================

    async fn handle_login_page(Query(query): Query<LoginQuery>) -> Json<LoginPage> {
        Json(LoginPage {
            action: endpoints::LOGIN.to_owned(),
            return_url: query.return_url,
        })
    }

    async fn handle_login(State(context): Context, Form(request): Form<LoginRequest>) -> Response {
        let (Some(username), Some(password)) =
            (request.username.as_deref(), request.password.as_deref())
        else {
            return OAuth2Error::invalid_request("username and password are required")
                .into_response();
        };
        let flows = context.flows();
        let subject = match flows.identity().authenticate(username, password).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                return AppError::auth_invalid("Invalid username or password").into_response()
            }
            Err(e) => return e.into_response(),
        };

        let now = Utc::now();
        let session = match flows
            .issuer()
            .issue_session_token(&subject.subject_id, now, now)
            .await
        {
            Ok(session) => session,
            Err(e) => return e.into_response(),
        };
        let config = context.config();
        let cookie = session_cookie(
            &session.value,
            config.lifetimes.session_secs,
            config.uses_https(),
        );

        let mut response = match request.return_url.as_deref() {
            Some(return_url) if is_local_return_url(return_url) => {
                Redirect::to(return_url).into_response()
            }
            _ => Json(serde_json::json!({ "status": "logged_in" })).into_response(),
        };
        set_cookie(response.headers_mut(), cookie);
        response
    }

    async fn handle_logout_get(
        State(context): Context,
        Query(request): Query<LogoutRequest>,
    ) -> Response {
        Self::logout(&context, request).await
    }

    async fn handle_logout_post(
        State(context): Context,
        Form(request): Form<LogoutRequest>,
    ) -> Response {
        Self::logout(&context, request).await
    }

    async fn logout(context: &ServerContext, request: LogoutRequest) -> Response {
        let flows = context.flows();
        let mut redirect_uri = None;

        if let (Some(hint), Some(target)) = (
            request.id_token_hint.as_deref(),
            request.post_logout_redirect_uri.as_deref(),
        ) {
            if is_encrypted(hint) {
                debug!("Encrypted id_token_hint; clients must send the decrypted signed token");
            } else {
                match flows.validator().verify_id_token_hint(hint).await {
                    Ok(id_claims) => match flows.clients().lookup(&id_claims.azp).await {
                        Ok(client) if client.has_post_logout_redirect_uri(target) => {
                            redirect_uri = Some(target.to_owned());
                        }
                        _ => debug!("post_logout_redirect_uri not registered for the client"),
                    },
                    Err(e) => debug!(reason = %e, "Ignoring invalid id_token_hint"),
                }
            }
        }

        let mut response = match redirect_uri {
            Some(target) => {
                redirect_with_params(&target, &[("state", request.state.as_deref())])
            }
            None => Json(serde_json::json!({ "status": "logged_out" })).into_response(),
        };
        set_cookie(
            response.headers_mut(),
            clear_session_cookie(context.config().uses_https()),
        );
        AppLogger::log_auth_event("session", true, Some("logout"));
        response
    }

    // ================================
    // Discovery
    // ================================

    async fn handle_discovery(State(context): Context) -> Json<DiscoveryDocument> {
        let config = context.config();
        Json(DiscoveryDocument {
            issuer: config.issuer().to_owned(),
            authorization_endpoint: config.endpoint_url(endpoints::AUTHORIZE),
            token_endpoint: config.endpoint_url(endpoints::TOKEN),
            device_authorization_endpoint: config.endpoint_url(endpoints::DEVICE),
            userinfo_endpoint: config.endpoint_url(endpoints::USERINFO),
            introspection_endpoint: config.endpoint_url(endpoints::INTROSPECT),
            revocation_endpoint: config.endpoint_url(endpoints::REVOKE),
            end_session_endpoint: config.endpoint_url(endpoints::LOGOUT),
            jwks_uri: config.endpoint_url(endpoints::JWKS),
            scopes_supported: scopes::SUPPORTED.iter().map(|s| (*s).to_owned()).collect(),
            response_types_supported: vec!["code".to_owned()],
            grant_types_supported: [
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::DeviceCode,
                GrantType::Password,
            ]
            .iter()
            .map(|grant| grant.as_str().to_owned())
            .collect(),
            subject_types_supported: vec!["public".to_owned()],
            id_token_signing_alg_values_supported: vec![SIGNING_ALGORITHM.to_owned()],
            id_token_encryption_alg_values_supported: vec![encryption::KEY_ALGORITHM.to_owned()],
            id_token_encryption_enc_values_supported: vec![
                encryption::CONTENT_ALGORITHM.to_owned(),
            ],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic".to_owned(),
                "client_secret_post".to_owned(),
                "none".to_owned(),
            ],
            code_challenge_methods_supported: vec!["S256".to_owned()],
            claims_supported: [
                "sub",
                "iss",
                "aud",
                "exp",
                "iat",
                "auth_time",
                "nonce",
                "azp",
                "at_hash",
                "email",
                "email_verified",
                "name",
                "given_name",
                "family_name",
                "preferred_username",
                "role",
            ]
            .iter()
            .map(|claim| (*claim).to_owned())
            .collect(),
        })
    }

    /// JWKS with an `ETag` so relying parties can cache between rotations
    async fn handle_jwks(State(context): Context, headers: HeaderMap) -> Response {
        let jwks = context.keys().jwks().await;
        let body = match serde_json::to_vec(&jwks) {
            Ok(body) => body,
            Err(e) => return AppError::from(e).into_response(),
        };
        let hash = Sha256::digest(&body);
        let etag = format!(r#""{}""#, hex::encode(&hash[..16]));
        let Ok(etag_value) = HeaderValue::from_str(&etag) else {
            return Json(jwks).into_response();
        };

        if headers
            .get(IF_NONE_MATCH)
            .is_some_and(|candidate| candidate == etag_value)
        {
            debug!("JWKS ETag match, returning 304 Not Modified");
            return (StatusCode::NOT_MODIFIED, [(ETAG, etag_value)]).into_response();
        }

        let mut response = Json(jwks).into_response();
        response.headers_mut().insert(ETAG, etag_value);
        response.headers_mut().insert(
            CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600"),
        );
        response
    }

    async fn handle_health() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339()
        }))
    }
}
