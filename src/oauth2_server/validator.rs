// ABOUTME: Token validator checking structure, signature, expiry, audience, and revocation in order
// ABOUTME: Short-circuits on the first failure; detail goes to logs, callers get invalid_token
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::constants::claims;
use crate::database_plugins::SharedDatabase;
use crate::errors::ValidationError;
use crate::models::{IdTokenClaims, TokenClaims, TokenUse};
use crate::oauth2_server::keys::KeyRing;

/// Verifies tokens minted by this server
#[derive(Clone)]
pub struct TokenValidator {
    issuer: String,
    keys: Arc<KeyRing>,
    database: SharedDatabase,
}

impl TokenValidator {
    /// Creates a new token validator
    #[must_use]
    pub const fn new(issuer: String, keys: Arc<KeyRing>, database: SharedDatabase) -> Self {
        Self {
            issuer,
            keys,
            database,
        }
    }

    /// Validate an access, refresh, or session token for `expected_audience`
    ///
    /// Checks, in order: structure, signature against the `kid` key, expiry
    /// (valid while `now <= exp`), audience, revocation.
    ///
    /// # Errors
    ///
    /// Returns the first failed check
    pub async fn validate(
        &self,
        token: &str,
        expected_audience: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        self.check(token, None, Some(expected_audience), now).await
    }

    /// Like [`Self::validate`] but also requires a specific token kind
    ///
    /// # Errors
    ///
    /// Returns `Malformed` when the kind differs, otherwise the first failed check
    pub async fn validate_as(
        &self,
        token: &str,
        kind: TokenUse,
        expected_audience: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        self.check(token, Some(kind), Some(expected_audience), now)
            .await
    }

    /// Bearer access token presented to `/connect/userinfo`
    ///
    /// The audience is whatever client the token was issued to.
    ///
    /// # Errors
    ///
    /// Returns the first failed check
    pub async fn validate_bearer(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        self.check(token, Some(TokenUse::AccessToken), None, now)
            .await
    }

    /// Refresh token presented at the token endpoint
    ///
    /// # Errors
    ///
    /// Returns the first failed check
    pub async fn validate_refresh_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        self.check(token, Some(TokenUse::RefreshToken), Some(&self.issuer), now)
            .await
    }

    /// Login session cookie
    ///
    /// # Errors
    ///
    /// Returns the first failed check
    pub async fn validate_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        self.check(
            token,
            Some(TokenUse::Session),
            Some(claims::SESSION_AUDIENCE),
            now,
        )
        .await
    }

    /// Access or refresh token under introspection; the caller checks the audience
    ///
    /// # Errors
    ///
    /// Returns the first failed check
    pub async fn inspect(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        let token_claims = self.check(token, None, None, now).await?;
        match token_claims.token_use {
            TokenUse::AccessToken | TokenUse::RefreshToken => Ok(token_claims),
            TokenUse::IdToken | TokenUse::Session => Err(ValidationError::Malformed),
        }
    }

    /// `id_token_hint` at the end-session endpoint
    ///
    /// Signature and issuer are verified; an expired hint is still accepted.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` or `InvalidSignature`
    pub async fn verify_id_token_hint(
        &self,
        token: &str,
    ) -> Result<IdTokenClaims, ValidationError> {
        let (typ, id_claims) = self.decode_verified::<IdTokenClaims>(token).await?;
        if typ.as_deref() != Some(claims::JWT_TYP) || id_claims.token_use != TokenUse::IdToken {
            return Err(ValidationError::Malformed);
        }
        if id_claims.iss != self.issuer {
            debug!(iss = %id_claims.iss, "id_token_hint from another issuer");
            return Err(ValidationError::InvalidSignature);
        }
        Ok(id_claims)
    }

    /// Refresh token presented for redemption, without the revocation lookup
    ///
    /// The grant flow loads the record itself so it can tell a replayed token
    /// from an unknown one.
    ///
    /// # Errors
    ///
    /// Returns the first failed check before revocation
    pub async fn decode_refresh_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        let result = self
            .run_checks(token, Some(TokenUse::RefreshToken), Some(&self.issuer), now)
            .await;
        if let Err(e) = &result {
            debug!(failed_check = %e, "Refresh token validation failed");
        }
        result
    }

    async fn check(
        &self,
        token: &str,
        kind: Option<TokenUse>,
        expected_audience: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        let mut result = self.run_checks(token, kind, expected_audience, now).await;
        if let Ok(token_claims) = &result {
            if self.is_revoked(token_claims).await {
                result = Err(ValidationError::Revoked);
            }
        }
        if let Err(e) = &result {
            debug!(failed_check = %e, "Token validation failed");
        }
        result
    }

    async fn run_checks(
        &self,
        token: &str,
        kind: Option<TokenUse>,
        expected_audience: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, ValidationError> {
        let (typ, token_claims) = self.decode_verified::<TokenClaims>(token).await?;

        if let Some(kind) = kind {
            if token_claims.token_use != kind {
                return Err(ValidationError::Malformed);
            }
        }
        if typ.as_deref() != Some(expected_typ(token_claims.token_use)) {
            return Err(ValidationError::Malformed);
        }
        if token_claims.iss != self.issuer {
            debug!(iss = %token_claims.iss, "Token from another issuer");
            return Err(ValidationError::InvalidSignature);
        }

        if now.timestamp() > token_claims.exp {
            return Err(ValidationError::Expired);
        }

        if let Some(audience) = expected_audience {
            if !token_claims.has_audience(audience) {
                return Err(ValidationError::WrongAudience);
            }
        }
        Ok(token_claims)
    }

    /// Structure and signature checks shared by every token kind
    async fn decode_verified<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<(Option<String>, T), ValidationError> {
        let header = decode_header(token).map_err(|_| ValidationError::Malformed)?;
        if header.alg != Algorithm::RS256 {
            return Err(ValidationError::Malformed);
        }
        let kid = header.kid.ok_or(ValidationError::Malformed)?;

        let Some(key) = self.keys.snapshot().await.find(&kid) else {
            debug!(kid = %kid, "Token signed with unknown key");
            return Err(ValidationError::InvalidSignature);
        };

        // exp/aud are checked afterwards so the check order stays fixed
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let data = decode::<T>(token, key.decoding_key(), &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    ValidationError::InvalidSignature
                }
                _ => ValidationError::Malformed,
            }
        })?;
        Ok((data.header.typ, data.claims))
    }

    /// Revocation lookup; storage failures count as revoked
    async fn is_revoked(&self, token_claims: &TokenClaims) -> bool {
        let lookup = match token_claims.token_use {
            TokenUse::RefreshToken => self
                .database
                .get_refresh_token(&token_claims.jti)
                .await
                .map(|record| record.is_none_or(|record| record.revoked)),
            TokenUse::AccessToken => {
                self.database
                    .is_access_token_revoked(&token_claims.jti)
                    .await
            }
            TokenUse::IdToken | TokenUse::Session => Ok(false),
        };
        lookup.unwrap_or_else(|e| {
            error!(error = %e, "Revocation lookup failed, rejecting token");
            true
        })
    }
}

/// JWT `typ` header expected for each token kind
#[must_use]
pub const fn expected_typ(kind: TokenUse) -> &'static str {
    match kind {
        TokenUse::AccessToken => claims::ACCESS_TOKEN_TYP,
        TokenUse::RefreshToken => claims::REFRESH_TOKEN_TYP,
        TokenUse::IdToken | TokenUse::Session => claims::JWT_TYP,
    }
}
