// ABOUTME: Grant flow controller orchestrating the authorization code, device, refresh, and password grants
// ABOUTME: Composes the client registry, session store, issuer, and validator; every flow fails closed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Grant flows
//!
//! Every flow ends in one of two ways: a [`TokenSet`] or a [`FlowError`] that
//! maps onto one standard OAuth 2.0 error. Anything half-validated is an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::scopes;
use crate::database_plugins::shared::mappers::from_timestamp;
use crate::database_plugins::shared::transactions::{retry_transaction, DEFAULT_MAX_RETRIES};
use crate::database_plugins::SharedDatabase;
use crate::errors::{AppResult, ClientError, FlowError, GrantError, OAuth2Error};
use crate::logging::AppLogger;
use crate::models::{
    AuthorizationRequest, Client, ConsumeOutcome, DeviceAuthorization, DevicePoll, GrantType,
    PendingAuthorization, ScopeSet, Subject, TokenUse,
};
use crate::oauth2_server::client_registration::ClientRegistry;
use crate::oauth2_server::identity::IdentityProvider;
use crate::oauth2_server::issuer::{GrantContext, TokenIssuer, TokenSet};
use crate::oauth2_server::models::{
    AuthorizeRequest, ClientCredentials, IntrospectionResponse, TokenRequest,
};
use crate::oauth2_server::pkce::{self, PkceMethod};
use crate::oauth2_server::sessions::AuthorizationSessionStore;
use crate::oauth2_server::validator::TokenValidator;

/// An authorization request that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    /// Requesting client
    pub client: Client,
    /// Registered redirect URI the response goes to
    pub redirect_uri: String,
    /// Scopes to grant
    pub scopes: ScopeSet,
    /// Client state, echoed back
    pub state: Option<String>,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE method, set whenever a challenge is present
    pub code_challenge_method: Option<PkceMethod>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// `prompt` parameter
    pub prompt: Option<String>,
}

/// Why an authorization request was refused
#[derive(Debug, Clone)]
pub enum AuthorizeRejection {
    /// Client or redirect URI could not be trusted; answer the user agent directly
    Direct(OAuth2Error),
    /// Report the error to the client's redirect URI
    Redirect {
        /// Verified redirect URI
        redirect_uri: String,
        /// Client state
        state: Option<String>,
        /// Error to report
        error: OAuth2Error,
    },
}

impl AuthorizeRejection {
    fn redirect(request: &AuthorizeRequest, redirect_uri: &str, error: OAuth2Error) -> Self {
        Self::Redirect {
            redirect_uri: redirect_uri.to_owned(),
            state: request.state.clone(),
            error,
        }
    }
}

/// Orchestrates the grant flows over the token engine components
#[derive(Clone)]
pub struct GrantFlowController {
    clients: ClientRegistry,
    sessions: AuthorizationSessionStore,
    issuer: TokenIssuer,
    validator: TokenValidator,
    identity: Arc<dyn IdentityProvider>,
    database: SharedDatabase,
}

impl GrantFlowController {
    /// Creates a new grant flow controller
    #[must_use]
    pub fn new(
        clients: ClientRegistry,
        sessions: AuthorizationSessionStore,
        issuer: TokenIssuer,
        validator: TokenValidator,
        identity: Arc<dyn IdentityProvider>,
        database: SharedDatabase,
    ) -> Self {
        Self {
            clients,
            sessions,
            issuer,
            validator,
            identity,
            database,
        }
    }

    /// Client registry
    #[must_use]
    pub const fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Authorization session store
    #[must_use]
    pub const fn sessions(&self) -> &AuthorizationSessionStore {
        &self.sessions
    }

    /// Token issuer
    #[must_use]
    pub const fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Token validator
    #[must_use]
    pub const fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Identity provider
    #[must_use]
    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    // ================================
    // Authorization endpoint
    // ================================

    /// Validate an authorization request
    ///
    /// Until the client and redirect URI are verified, errors are answered
    /// directly; afterwards they are redirected to the client.
    ///
    /// # Errors
    ///
    /// Returns the rejection and where it must be delivered
    pub async fn validate_authorization(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<ValidatedAuthorization, AuthorizeRejection> {
        let client_id = non_empty(request.client_id.as_deref()).ok_or_else(|| {
            AuthorizeRejection::Direct(OAuth2Error::invalid_request("client_id is required"))
        })?;
        let client = match self.clients.lookup(client_id).await {
            Ok(client) => client,
            Err(ClientError::NotFound { .. }) => {
                return Err(AuthorizeRejection::Direct(OAuth2Error::invalid_request(
                    "The client is not registered",
                )))
            }
            Err(e) => return Err(AuthorizeRejection::Direct(e.oauth_error())),
        };
        let redirect_uri = non_empty(request.redirect_uri.as_deref()).ok_or_else(|| {
            AuthorizeRejection::Direct(OAuth2Error::invalid_request("redirect_uri is required"))
        })?;
        ClientRegistry::ensure_redirect_uri(&client, redirect_uri)
            .map_err(|e| AuthorizeRejection::Direct(e.oauth_error()))?;

        let reject = |error| AuthorizeRejection::redirect(request, redirect_uri, error);

        if request.response_type.as_deref() != Some("code") {
            return Err(reject(OAuth2Error::unsupported_response_type()));
        }
        ClientRegistry::ensure_grant(&client, GrantType::AuthorizationCode)
            .map_err(|e| reject(e.oauth_error()))?;
        let granted = Self::resolve_scopes(&client, request.scope.as_deref())
            .map_err(|e| reject(e.oauth_error()))?;

        let code_challenge = non_empty(request.code_challenge.as_deref());
        let code_challenge_method = match code_challenge {
            Some(challenge) => {
                let requested = non_empty(request.code_challenge_method.as_deref());
                let Some(method) = PkceMethod::parse(requested) else {
                    let description = if requested.is_none() {
                        "code_challenge_method is required with a code_challenge"
                    } else {
                        "Only the S256 code_challenge_method is supported"
                    };
                    return Err(reject(OAuth2Error::invalid_request(description)));
                };
                if !pkce::is_valid_challenge(challenge) {
                    return Err(reject(OAuth2Error::invalid_request(
                        "The code_challenge is malformed",
                    )));
                }
                Some(method)
            }
            None if client.requires_pkce => {
                return Err(reject(OAuth2Error::invalid_request(
                    "code_challenge is required for this client",
                )));
            }
            None => None,
        };

        Ok(ValidatedAuthorization {
            redirect_uri: redirect_uri.to_owned(),
            scopes: granted,
            state: request.state.clone(),
            code_challenge: code_challenge.map(str::to_owned),
            code_challenge_method,
            nonce: request.nonce.clone(),
            prompt: request.prompt.clone(),
            client,
        })
    }

    /// Store an approved authorization and return its code
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    pub async fn issue_authorization_code(
        &self,
        authorization: &ValidatedAuthorization,
        subject_id: &str,
        auth_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<AuthorizationRequest> {
        self.sessions
            .create(
                PendingAuthorization {
                    client_id: authorization.client.client_id.clone(),
                    subject_id: subject_id.to_owned(),
                    scopes: authorization.scopes.clone(),
                    redirect_uri: authorization.redirect_uri.clone(),
                    code_challenge: authorization.code_challenge.clone(),
                    code_challenge_method: authorization
                        .code_challenge_method
                        .map(|method| method.as_str().to_owned()),
                    nonce: authorization.nonce.clone(),
                    auth_time,
                },
                now,
            )
            .await
    }

    // ================================
    // Device authorization endpoint
    // ================================

    /// Start a device authorization for an authenticated client
    ///
    /// # Errors
    ///
    /// Returns a client, scope, or storage failure
    pub async fn start_device_authorization(
        &self,
        credentials: Option<ClientCredentials>,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DeviceAuthorization, FlowError> {
        let client = self.authenticate_client(credentials).await?;
        ClientRegistry::ensure_grant(&client, GrantType::DeviceCode)?;
        let granted = Self::resolve_scopes(&client, scope)?;
        Ok(self
            .sessions
            .create_device(&client.client_id, granted, now)
            .await?)
    }

    // ================================
    // Token endpoint
    // ================================

    /// Redeem a grant at the token endpoint
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the flow
    pub async fn exchange(
        &self,
        request: &TokenRequest,
        credentials: Option<ClientCredentials>,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, FlowError> {
        let grant_type = match non_empty(request.grant_type.as_deref()) {
            None => return Err(FlowError::InvalidRequest("grant_type is required".to_owned())),
            Some(value) => GrantType::parse(value)
                .ok_or_else(|| FlowError::UnsupportedGrantType(value.to_owned()))?,
        };
        let client = self.authenticate_client(credentials).await?;
        ClientRegistry::ensure_grant(&client, grant_type)?;

        let tokens = match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(client, request, now).await?,
            GrantType::DeviceCode => self.exchange_device_code(client, request, now).await?,
            GrantType::RefreshToken => self.exchange_refresh_token(client, request, now).await?,
            GrantType::Password => self.exchange_password(client, request, now).await?,
        };

        let access_token = &tokens.access_token;
        AppLogger::log_token_issued(
            &access_token.client_id,
            &access_token.subject_id,
            grant_type.as_str(),
            &access_token.scopes.to_string(),
        );
        Ok(tokens)
    }

    async fn exchange_code(
        &self,
        client: Client,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, FlowError> {
        let code = required(request.code.as_deref(), "code")?;
        let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri")?;

        let authorization = match self.sessions.consume(code, now).await? {
            ConsumeOutcome::Consumed(authorization) => authorization,
            ConsumeOutcome::NotFound => return Err(GrantError::CodeNotFound.into()),
            ConsumeOutcome::Expired => return Err(GrantError::CodeExpired.into()),
            ConsumeOutcome::AlreadyConsumed(authorization) => {
                if authorization.client_id == client.client_id {
                    self.revoke_authorization(&authorization.authorization_id, now)
                        .await?;
                }
                AppLogger::log_security_event(
                    "authorization_code_replay",
                    "high",
                    &format!("authorization_id={}", authorization.authorization_id),
                    Some(&client.client_id),
                );
                return Err(GrantError::CodeAlreadyConsumed.into());
            }
        };

        if authorization.client_id != client.client_id {
            return Err(GrantError::ClientMismatch.into());
        }
        if authorization.redirect_uri != redirect_uri {
            return Err(GrantError::RedirectUriMismatch.into());
        }
        if client.requires_pkce && authorization.code_challenge.is_none() {
            return Err(GrantError::PkceVerifierMissing.into());
        }
        pkce::verify(
            authorization.code_challenge.as_deref(),
            authorization.code_challenge_method.as_deref(),
            non_empty(request.code_verifier.as_deref()),
        )?;

        let subject = self.load_subject(&authorization.subject_id).await?;
        let grant = GrantContext {
            authorization_id: authorization.authorization_id,
            subject,
            client,
            scopes: authorization.requested_scopes,
            auth_time: Some(authorization.auth_time),
            nonce: authorization.nonce,
        };
        Ok(self.issuer.issue_token_set(&grant, now).await?)
    }

    async fn exchange_device_code(
        &self,
        client: Client,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, FlowError> {
        let device_code = required(request.device_code.as_deref(), "device_code")?;

        let device = match self
            .sessions
            .poll_device(device_code, &client.client_id, now)
            .await?
        {
            DevicePoll::Approved(device) => device,
            DevicePoll::Pending => return Err(FlowError::AuthorizationPending),
            DevicePoll::SlowDown => return Err(FlowError::SlowDown),
            DevicePoll::Denied => return Err(FlowError::AccessDenied),
            DevicePoll::Expired => return Err(FlowError::ExpiredToken),
            DevicePoll::NotFound => return Err(GrantError::DeviceCodeNotFound.into()),
            DevicePoll::AlreadyConsumed => return Err(GrantError::DeviceCodeConsumed.into()),
        };

        let Some(subject_id) = device.subject_id.as_deref() else {
            warn!(client_id = %client.client_id, "Approved device authorization without a subject");
            return Err(GrantError::DeviceCodeNotFound.into());
        };
        let subject = self.load_subject(subject_id).await?;
        let grant = GrantContext {
            authorization_id: device.authorization_id,
            subject,
            client,
            scopes: device.scopes,
            auth_time: device.auth_time,
            nonce: None,
        };
        Ok(self.issuer.issue_token_set(&grant, now).await?)
    }

    async fn exchange_refresh_token(
        &self,
        client: Client,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, FlowError> {
        let presented = required(request.refresh_token.as_deref(), "refresh_token")?;

        let token_claims = self
            .validator
            .decode_refresh_token(presented, now)
            .await
            .map_err(|_| GrantError::RefreshTokenInvalid)?;
        let Some(record) = self.database.get_refresh_token(&token_claims.jti).await? else {
            return Err(GrantError::RefreshTokenInvalid.into());
        };
        if record.client_id != client.client_id || token_claims.client_id != client.client_id {
            debug!(client_id = %client.client_id, "Refresh token presented by another client");
            return Err(GrantError::RefreshTokenInvalid.into());
        }
        if record.revoked {
            let revoked = self
                .revoke_authorization(&record.authorization_id, now)
                .await?;
            AppLogger::log_security_event(
                "refresh_token_replay",
                "high",
                &format!(
                    "authorization_id={} tokens_revoked={revoked}",
                    record.authorization_id
                ),
                Some(&client.client_id),
            );
            return Err(GrantError::RefreshTokenRevoked.into());
        }

        let granted = match non_empty(request.scope.as_deref()) {
            None => record.scopes.clone(),
            Some(requested) => {
                let requested = ScopeSet::parse(requested);
                if let Some(scope) = requested.first_outside(&record.scopes) {
                    return Err(GrantError::ScopeWidened {
                        scope: scope.to_owned(),
                    }
                    .into());
                }
                requested
            }
        };

        let subject = self.load_subject(&record.subject_id).await?;
        let grant = GrantContext {
            authorization_id: record.authorization_id.clone(),
            subject,
            client,
            scopes: granted,
            auth_time: record.auth_time,
            nonce: None,
        };

        // Sign first so a signing failure never burns the presented token
        let access_token = self.issuer.issue_access_token(&grant, now).await?;
        let id_token = if grant.scopes.contains(scopes::OPENID) {
            Some(
                self.issuer
                    .issue_id_token(&grant, Some(access_token.value.as_str()), now)
                    .await?,
            )
        } else {
            None
        };
        let Some(refresh_token) = self
            .issuer
            .rotate_refresh_token(&record, &grant, now)
            .await?
        else {
            // Lost the race against a concurrent redemption of the same token
            return Err(GrantError::RefreshTokenRevoked.into());
        };

        Ok(TokenSet {
            access_token,
            refresh_token: Some(refresh_token),
            id_token,
        })
    }

    async fn exchange_password(
        &self,
        client: Client,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, FlowError> {
        let username = required(request.username.as_deref(), "username")?;
        let password = required(request.password.as_deref(), "password")?;
        let granted = Self::resolve_scopes(&client, request.scope.as_deref())?;

        let Some(subject) = self.identity.authenticate(username, password).await? else {
            return Err(GrantError::InvalidCredentials.into());
        };
        let grant = GrantContext {
            authorization_id: Uuid::new_v4().to_string(),
            subject,
            client,
            scopes: granted,
            auth_time: Some(now),
            nonce: None,
        };
        Ok(self.issuer.issue_token_set(&grant, now).await?)
    }

    // ================================
    // Introspection and revocation
    // ================================

    /// Report whether a token is active for the calling client (RFC 7662)
    ///
    /// # Errors
    ///
    /// Returns a client authentication failure
    pub async fn introspect(
        &self,
        credentials: Option<ClientCredentials>,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<IntrospectionResponse, FlowError> {
        let caller = self.authenticate_client(credentials).await?;
        let Ok(token_claims) = self.validator.inspect(token, now).await else {
            return Ok(IntrospectionResponse::inactive());
        };
        if token_claims.client_id != caller.client_id
            && !token_claims.has_audience(&caller.client_id)
        {
            debug!(caller = %caller.client_id, "Introspection by an unrelated client");
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(token_claims.scope),
            client_id: Some(token_claims.client_id),
            sub: Some(token_claims.sub),
            aud: Some(token_claims.aud),
            iss: Some(token_claims.iss),
            exp: Some(token_claims.exp),
            iat: Some(token_claims.iat),
            jti: Some(token_claims.jti),
            token_type: Some(token_claims.token_use.as_str().to_owned()),
        })
    }

    /// Revoke a token issued to the calling client (RFC 7009)
    ///
    /// Unknown, invalid, or foreign tokens are ignored.
    ///
    /// # Errors
    ///
    /// Returns a client authentication or storage failure
    pub async fn revoke(
        &self,
        credentials: Option<ClientCredentials>,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), FlowError> {
        let caller = self.authenticate_client(credentials).await?;
        let token_claims = match self.validator.inspect(token, now).await {
            Ok(token_claims) => token_claims,
            Err(e) => {
                debug!(reason = %e, "Nothing to revoke");
                return Ok(());
            }
        };
        if token_claims.client_id != caller.client_id {
            warn!(caller = %caller.client_id, "Revocation of another client's token ignored");
            return Ok(());
        }

        match token_claims.token_use {
            TokenUse::RefreshToken => {
                retry_transaction(
                    || self.database.revoke_refresh_token(&token_claims.jti, now),
                    DEFAULT_MAX_RETRIES,
                )
                .await?;
            }
            TokenUse::AccessToken => {
                let expires_at = from_timestamp(token_claims.exp)?;
                retry_transaction(
                    || {
                        self.database.revoke_access_token(
                            &token_claims.jti,
                            &token_claims.client_id,
                            expires_at,
                        )
                    },
                    DEFAULT_MAX_RETRIES,
                )
                .await?;
            }
            TokenUse::IdToken | TokenUse::Session => return Ok(()),
        }
        AppLogger::log_token_revoked(
            &caller.client_id,
            token_claims.token_use.as_str(),
            "client request",
        );
        Ok(())
    }

    // ================================
    // Helpers
    // ================================

    /// Authenticate the caller of a client-authenticated endpoint
    ///
    /// # Errors
    ///
    /// Returns `InvalidSecret` when no credentials were presented
    pub async fn authenticate_client(
        &self,
        credentials: Option<ClientCredentials>,
    ) -> Result<Client, ClientError> {
        let Some(credentials) = credentials else {
            debug!("Client credentials missing");
            return Err(ClientError::InvalidSecret);
        };
        self.clients
            .authenticate(
                &credentials.client_id,
                non_empty(credentials.client_secret.as_deref()),
            )
            .await
    }

    /// Resolve the `scope` parameter against the supported and allowed scopes
    ///
    /// An omitted scope means everything the client may request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` for unknown values, `ScopeNotAllowed` otherwise
    pub fn resolve_scopes(client: &Client, requested: Option<&str>) -> Result<ScopeSet, FlowError> {
        let Some(requested) = non_empty(requested) else {
            return Ok(client.allowed_scopes.clone());
        };
        let requested = ScopeSet::parse(requested);
        if let Some(unknown) = requested
            .iter()
            .find(|scope| !scopes::SUPPORTED.contains(scope))
        {
            return Err(FlowError::InvalidScope(unknown.to_owned()));
        }
        ClientRegistry::ensure_scopes(client, &requested)?;
        Ok(requested)
    }

    async fn load_subject(&self, subject_id: &str) -> Result<Subject, FlowError> {
        self.identity
            .find_subject(subject_id)
            .await?
            .ok_or_else(|| {
                warn!(subject_id = %subject_id, "Grant for a subject that no longer exists");
                FlowError::Grant(GrantError::InvalidCredentials)
            })
    }

    async fn revoke_authorization(
        &self,
        authorization_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let revoked = retry_transaction(
            || self.database.revoke_authorization(authorization_id, now),
            DEFAULT_MAX_RETRIES,
        )
        .await?;
        debug!(authorization_id = %authorization_id, revoked, "Revoked authorization");
        Ok(revoked)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, FlowError> {
    non_empty(value).ok_or_else(|| FlowError::InvalidRequest(format!("{name} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientType, ConsentType};
    use std::collections::BTreeSet;

    fn client() -> Client {
        Client {
            client_id: "c1".to_owned(),
            client_type: ClientType::Public,
            secret_hash: None,
            display_name: None,
            allowed_grant_types: BTreeSet::from([GrantType::AuthorizationCode]),
            redirect_uris: BTreeSet::from(["https://app/cb".to_owned()]),
            post_logout_redirect_uris: BTreeSet::new(),
            allowed_scopes: ScopeSet::parse("openid profile dataEventRecords"),
            requires_pkce: true,
            consent_type: ConsentType::Implicit,
            access_token_lifetime_secs: None,
            requires_encryption: false,
            encryption_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_scopes_defaults_to_allowed() {
        let granted = GrantFlowController::resolve_scopes(&client(), None).unwrap();
        assert_eq!(granted.to_string(), "dataEventRecords openid profile");

        let granted = GrantFlowController::resolve_scopes(&client(), Some("  ")).unwrap();
        assert_eq!(granted, client().allowed_scopes);
    }

    #[test]
    fn test_resolve_scopes_rejects_unknown_and_disallowed() {
        let unknown = GrantFlowController::resolve_scopes(&client(), Some("openid admin"));
        assert!(matches!(unknown, Err(FlowError::InvalidScope(scope)) if scope == "admin"));

        let disallowed = GrantFlowController::resolve_scopes(&client(), Some("openid roles"));
        let error = disallowed.unwrap_err();
        assert!(matches!(
            error,
            FlowError::Client(ClientError::ScopeNotAllowed { .. })
        ));
        assert_eq!(error.oauth_error().error, "invalid_scope");
    }

    #[test]
    fn test_required_parameters() {
        assert_eq!(required(Some("abc"), "code").unwrap(), "abc");
        let missing = required(Some(""), "code").unwrap_err();
        assert_eq!(missing.oauth_error().error, "invalid_request");
        assert!(required(None, "code").is_err());
    }
}
