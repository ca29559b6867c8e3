// ABOUTME: HTTP-level helpers shared by the provider endpoints
// ABOUTME: Client credential extraction, session cookies, and authorization response redirects
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::borrow::Cow;

use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use chrono::{DateTime, Utc};
use http::header::{CACHE_CONTROL, COOKIE, PRAGMA, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use tracing::error;
use url::form_urlencoded;
use url::Url;

use crate::constants::{cookies, endpoints};
use crate::errors::OAuth2Error;
use crate::models::TokenClaims;
use crate::oauth2_server::models::{AuthorizeRequest, ClientCredentials};
use crate::oauth2_server::validator::TokenValidator;

/// Resolve client credentials from `client_secret_basic` or `client_secret_post`
///
/// Basic credentials are form-urlencoded before base64 (RFC 6749 Section 2.3.1).
///
/// # Errors
///
/// Returns `invalid_request` when both methods are used with different client ids,
/// or when the Basic credentials are not valid UTF-8 after decoding
pub fn client_credentials(
    basic: Option<&Authorization<Basic>>,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<Option<ClientCredentials>, OAuth2Error> {
    let form_client_id = form_client_id.filter(|id| !id.is_empty());

    let Some(basic) = basic else {
        return Ok(form_client_id.map(|client_id| ClientCredentials {
            client_id: client_id.to_owned(),
            client_secret: form_client_secret
                .filter(|secret| !secret.is_empty())
                .map(str::to_owned),
        }));
    };

    let decode = |value: &str| {
        urlencoding::decode(value)
            .map(Cow::into_owned)
            .map_err(|_| OAuth2Error::invalid_request("Malformed client credentials"))
    };
    let client_id = decode(basic.username())?;
    let client_secret = decode(basic.password())?;

    if form_client_id.is_some_and(|id| id != client_id) {
        return Err(OAuth2Error::invalid_request(
            "Conflicting client authentication methods",
        ));
    }
    Ok(Some(ClientCredentials {
        client_id,
        client_secret: Some(client_secret).filter(|secret| !secret.is_empty()),
    }))
}

/// Value of the session cookie, if present
#[must_use]
pub fn session_cookie_value(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == cookies::SESSION).then_some(value)
        })
}

/// Validated login session of the request, if any
pub async fn current_session(
    headers: &HeaderMap,
    validator: &TokenValidator,
    now: DateTime<Utc>,
) -> Option<TokenClaims> {
    let token = session_cookie_value(headers)?;
    validator.validate_session(token, now).await.ok()
}

/// `Set-Cookie` value establishing a login session
#[must_use]
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}={token}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax{secure}",
        cookies::SESSION
    ))
    .ok()
}

/// `Set-Cookie` value ending the login session
#[must_use]
pub fn clear_session_cookie(secure: bool) -> Option<HeaderValue> {
    session_cookie("", 0, secure)
}

/// Only same-origin absolute paths may be used as a post-login target
#[must_use]
pub fn is_local_return_url(return_url: &str) -> bool {
    return_url.starts_with('/') && !return_url.starts_with("//") && !return_url.contains('\\')
}

/// Path and query of the authorization request to resume after login
#[must_use]
pub fn authorize_return_url(request: &AuthorizeRequest) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    let params = [
        ("response_type", &request.response_type),
        ("client_id", &request.client_id),
        ("redirect_uri", &request.redirect_uri),
        ("scope", &request.scope),
        ("state", &request.state),
        ("code_challenge", &request.code_challenge),
        ("code_challenge_method", &request.code_challenge_method),
        ("nonce", &request.nonce),
    ];
    for (name, value) in params {
        if let Some(value) = value {
            query.append_pair(name, value);
        }
    }
    format!("{}?{}", endpoints::AUTHORIZE, query.finish())
}

/// Redirect to the login page, resuming at `return_url`
#[must_use]
pub fn login_redirect(return_url: &str) -> Response {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("return_url", return_url)
        .finish();
    Redirect::to(&format!("{}?{query}", endpoints::LOGIN)).into_response()
}

/// Redirect to `redirect_uri` with extra query parameters
///
/// Parameters already present on the registered URI are preserved.
#[must_use]
pub fn redirect_with_params(redirect_uri: &str, params: &[(&str, Option<&str>)]) -> Response {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        error!(redirect_uri = %redirect_uri, "Registered redirect URI does not parse");
        return OAuth2Error::server_error().into_response();
    };
    {
        let mut query = url.query_pairs_mut();
        for (name, value) in params {
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
    }
    Redirect::to(url.as_str()).into_response()
}

/// Authorization error delivered to the client's redirect URI
#[must_use]
pub fn error_redirect(redirect_uri: &str, error: &OAuth2Error, state: Option<&str>) -> Response {
    redirect_with_params(
        redirect_uri,
        &[
            ("error", Some(error.error.as_str())),
            ("error_description", error.error_description.as_deref()),
            ("state", state),
        ],
    )
}

/// Headers required on every token-bearing response (RFC 6749 Section 5.1)
pub fn apply_no_store(headers: &mut HeaderMap) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
}

/// Attach a `Set-Cookie` header when the value could be built
pub fn set_cookie(headers: &mut HeaderMap, cookie: Option<HeaderValue>) {
    if let Some(cookie) = cookie {
        headers.append(SET_COOKIE, cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::LOCATION;

    #[test]
    fn test_basic_credentials_are_form_decoded() {
        let basic = Authorization::basic("my%20client", "s%3Acret");
        let credentials = client_credentials(Some(&basic), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(credentials.client_id, "my client");
        assert_eq!(credentials.client_secret.as_deref(), Some("s:cret"));
    }

    #[test]
    fn test_conflicting_client_ids_rejected() {
        let basic = Authorization::basic("a", "secret");
        let error = client_credentials(Some(&basic), Some("b"), None).unwrap_err();
        assert_eq!(error.error, "invalid_request");

        let same = client_credentials(Some(&basic), Some("a"), None).unwrap();
        assert!(same.is_some());
    }

    #[test]
    fn test_post_credentials_and_public_clients() {
        let credentials = client_credentials(None, Some("c1"), Some(""))
            .unwrap()
            .unwrap();
        assert_eq!(credentials.client_id, "c1");
        assert!(credentials.client_secret.is_none());
        assert!(client_credentials(None, None, None).unwrap().is_none());
    }

    #[test]
    fn test_session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; oidc_session=abc.def.ghi; other=1"),
        );
        assert_eq!(session_cookie_value(&headers), Some("abc.def.ghi"));

        let cookie = session_cookie("tok", 60, true).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn test_return_url_must_be_local() {
        assert!(is_local_return_url("/connect/authorize?client_id=a"));
        assert!(!is_local_return_url("//evil.example/"));
        assert!(!is_local_return_url("https://evil.example/"));
        assert!(!is_local_return_url("/\\evil.example"));
    }

    #[test]
    fn test_error_redirect_keeps_registered_query() {
        let response = error_redirect(
            "https://app/cb?tenant=1",
            &OAuth2Error::access_denied("denied"),
            Some("xyz"),
        );
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://app/cb?tenant=1&error=access_denied"));
        assert!(location.ends_with("&state=xyz"));
    }
}
