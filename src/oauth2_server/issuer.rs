// ABOUTME: Token issuer minting RS256 access, refresh, identity, and session tokens
// ABOUTME: Refresh tokens are persisted and rotated; access and identity tokens are stateless
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Token issuance
//!
//! Lifetimes: access tokens live for the shortest of the server default, the
//! client override and any per-scope override. Refresh rotation policy is
//! "rotate": a redemption revokes the presented token and mints a new one with
//! the same authorization id and scope set, inside one transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::TokenLifetimes;
use crate::constants::{claims, scopes};
use crate::database_plugins::shared::mappers::from_timestamp;
use crate::database_plugins::shared::transactions::{retry_transaction, DEFAULT_MAX_RETRIES};
use crate::database_plugins::SharedDatabase;
use crate::errors::AppResult;
use crate::models::{
    Client, GrantType, IdTokenClaims, IssuedToken, RefreshTokenRecord, ScopeSet, Subject,
    TokenClaims, TokenUse,
};
use crate::oauth2_server::encryption;
use crate::oauth2_server::keys::KeyRing;
use crate::oauth2_server::validator::expected_typ;

/// Everything a token set is minted from
#[derive(Debug, Clone)]
pub struct GrantContext {
    /// Authorization id shared by all tokens of this grant
    pub authorization_id: String,
    /// Resource owner
    pub subject: Subject,
    /// Client receiving the tokens
    pub client: Client,
    /// Scopes granted to the access token
    pub scopes: ScopeSet,
    /// When the resource owner authenticated
    pub auth_time: Option<DateTime<Utc>>,
    /// OIDC nonce for the identity token
    pub nonce: Option<String>,
}

/// Tokens returned by one successful grant
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Bearer access token
    pub access_token: IssuedToken,
    /// Rotating refresh token (`offline_access`)
    pub refresh_token: Option<IssuedToken>,
    /// Identity token (`openid`)
    pub id_token: Option<IssuedToken>,
}

/// Mints and signs tokens with the key ring's current key
#[derive(Clone)]
pub struct TokenIssuer {
    issuer: String,
    keys: Arc<KeyRing>,
    database: SharedDatabase,
    lifetimes: TokenLifetimes,
    resource_audiences: BTreeMap<String, String>,
}

impl TokenIssuer {
    /// Creates a new token issuer
    #[must_use]
    pub const fn new(
        issuer: String,
        keys: Arc<KeyRing>,
        database: SharedDatabase,
        lifetimes: TokenLifetimes,
        resource_audiences: BTreeMap<String, String>,
    ) -> Self {
        Self {
            issuer,
            keys,
            database,
            lifetimes,
            resource_audiences,
        }
    }

    /// Issuer URL placed in `iss`
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Access token lifetime for this client and scope set
    #[must_use]
    pub fn access_token_lifetime(&self, client: &Client, scopes: &ScopeSet) -> Duration {
        let client_secs = client
            .access_token_lifetime_secs
            .unwrap_or(self.lifetimes.access_token_secs);
        let secs = scopes
            .iter()
            .filter_map(|scope| self.lifetimes.scope_access_token_secs.get(scope))
            .fold(client_secs, |shortest, secs| shortest.min(*secs));
        Duration::seconds(secs)
    }

    /// `aud` of an access token: the client plus each requested resource
    #[must_use]
    pub fn access_token_audiences(&self, client_id: &str, scopes: &ScopeSet) -> Vec<String> {
        let mut audiences = vec![client_id.to_owned()];
        for audience in scopes
            .iter()
            .filter_map(|scope| self.resource_audiences.get(scope))
        {
            if !audiences.contains(audience) {
                audiences.push(audience.clone());
            }
        }
        audiences
    }

    /// Mint the access, identity, and refresh tokens of a grant
    ///
    /// The refresh record is written last with a single insert, so a failure
    /// leaves nothing persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or storage fails
    pub async fn issue_token_set(
        &self,
        grant: &GrantContext,
        now: DateTime<Utc>,
    ) -> AppResult<TokenSet> {
        let access_token = self.issue_access_token(grant, now).await?;
        let id_token = if grant.scopes.contains(scopes::OPENID) {
            Some(
                self.issue_id_token(grant, Some(access_token.value.as_str()), now)
                    .await?,
            )
        } else {
            None
        };
        let refresh_token = if Self::wants_refresh_token(grant) {
            Some(self.issue_refresh_token(grant, now).await?)
        } else {
            None
        };
        Ok(TokenSet {
            access_token,
            refresh_token,
            id_token,
        })
    }

    /// Whether a grant earns a refresh token
    #[must_use]
    pub fn wants_refresh_token(grant: &GrantContext) -> bool {
        grant.scopes.contains(scopes::OFFLINE_ACCESS)
            && grant.client.allows_grant(GrantType::RefreshToken)
    }

    /// Sign an access token (`at+jwt`)
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails
    pub async fn issue_access_token(
        &self,
        grant: &GrantContext,
        now: DateTime<Utc>,
    ) -> AppResult<IssuedToken> {
        let lifetime = self.access_token_lifetime(&grant.client, &grant.scopes);
        let audiences = self.access_token_audiences(&grant.client.client_id, &grant.scopes);
        self.sign_claims(
            grant,
            &grant.scopes,
            TokenUse::AccessToken,
            audiences,
            lifetime,
            now,
        )
        .await
    }

    /// Sign and persist a refresh token (`rt+jwt`)
    ///
    /// # Errors
    ///
    /// Returns an error if signing or storage fails
    pub async fn issue_refresh_token(
        &self,
        grant: &GrantContext,
        now: DateTime<Utc>,
    ) -> AppResult<IssuedToken> {
        let (token, record) = self.mint_refresh_token(grant, &grant.scopes, now).await?;
        retry_transaction(
            || self.database.store_refresh_token(&record),
            DEFAULT_MAX_RETRIES,
        )
        .await?;
        Ok(token)
    }

    /// Revoke `presented` and persist its successor in one transaction
    ///
    /// The successor keeps the presented token's scope set. Returns `None`
    /// when `presented` was no longer active, i.e. another redemption won.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or storage fails
    pub async fn rotate_refresh_token(
        &self,
        presented: &RefreshTokenRecord,
        grant: &GrantContext,
        now: DateTime<Utc>,
    ) -> AppResult<Option<IssuedToken>> {
        let (token, record) = self.mint_refresh_token(grant, &presented.scopes, now).await?;
        let rotated = retry_transaction(
            || {
                self.database
                    .rotate_refresh_token(&presented.token_id, &record, now)
            },
            DEFAULT_MAX_RETRIES,
        )
        .await?;
        Ok(rotated.then_some(token))
    }

    /// Sign an identity token (`JWT`) with the claims released by the granted scopes
    ///
    /// Clients that require encryption receive the signed token wrapped in a
    /// compact JWE; `token_id` is derived from the value actually returned.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or encryption fails
    pub async fn issue_id_token(
        &self,
        grant: &GrantContext,
        access_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<IssuedToken> {
        let key = self.keys.current().await;
        let iat = now.timestamp();
        let exp = iat + self.lifetimes.identity_token_secs;
        let subject = &grant.subject;
        let granted = &grant.scopes;
        let profile = granted.contains(scopes::PROFILE);
        let email = granted.contains(scopes::EMAIL);

        let id_claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.subject_id.clone(),
            aud: vec![grant.client.client_id.clone()],
            exp,
            iat,
            auth_time: grant.auth_time.map_or(iat, |at| at.timestamp()),
            azp: grant.client.client_id.clone(),
            token_use: TokenUse::IdToken,
            nonce: grant.nonce.clone(),
            at_hash: access_token.map(left_half_hash),
            email: email.then(|| subject.email.clone()).flatten(),
            email_verified: email.then_some(subject.email_verified),
            name: profile.then(|| subject.name.clone()).flatten(),
            given_name: profile.then(|| subject.given_name.clone()).flatten(),
            family_name: profile.then(|| subject.family_name.clone()).flatten(),
            preferred_username: profile.then(|| subject.username.clone()),
            role: if granted.contains(scopes::ROLES) {
                subject.roles.clone()
            } else {
                Vec::new()
            },
        };
        let signed = key.sign(claims::JWT_TYP, &id_claims)?;
        let value = encryption::seal_for_client(&grant.client, signed)?;

        Ok(IssuedToken {
            token_id: left_half_hash(&value),
            value,
            kind: TokenUse::IdToken,
            subject_id: subject.subject_id.clone(),
            client_id: grant.client.client_id.clone(),
            scopes: granted.clone(),
            issued_at: from_timestamp(iat)?,
            expires_at: from_timestamp(exp)?,
            key_id: key.kid.clone(),
        })
    }

    /// Sign a login session token for the session cookie
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails
    pub async fn issue_session_token(
        &self,
        subject_id: &str,
        auth_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<IssuedToken> {
        let key = self.keys.current().await;
        let iat = now.timestamp();
        let exp = iat + self.lifetimes.session_secs;
        let session = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject_id.to_owned(),
            aud: vec![claims::SESSION_AUDIENCE.to_owned()],
            exp,
            iat,
            jti: Uuid::new_v4().to_string(),
            client_id: claims::SESSION_AUDIENCE.to_owned(),
            scope: String::new(),
            token_use: TokenUse::Session,
            azid: None,
            auth_time: Some(auth_time.timestamp()),
        };
        let value = key.sign(claims::JWT_TYP, &session)?;
        Ok(IssuedToken {
            value,
            token_id: session.jti,
            kind: TokenUse::Session,
            subject_id: subject_id.to_owned(),
            client_id: session.client_id,
            scopes: ScopeSet::default(),
            issued_at: from_timestamp(iat)?,
            expires_at: from_timestamp(exp)?,
            key_id: key.kid.clone(),
        })
    }

    async fn mint_refresh_token(
        &self,
        grant: &GrantContext,
        scopes: &ScopeSet,
        now: DateTime<Utc>,
    ) -> AppResult<(IssuedToken, RefreshTokenRecord)> {
        let token = self
            .sign_claims(
                grant,
                scopes,
                TokenUse::RefreshToken,
                vec![self.issuer.clone()],
                Duration::seconds(self.lifetimes.refresh_token_secs),
                now,
            )
            .await?;
        let record = RefreshTokenRecord {
            token_id: token.token_id.clone(),
            authorization_id: grant.authorization_id.clone(),
            client_id: grant.client.client_id.clone(),
            subject_id: grant.subject.subject_id.clone(),
            scopes: scopes.clone(),
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            auth_time: grant.auth_time,
            revoked: false,
            revoked_at: None,
        };
        Ok((token, record))
    }

    async fn sign_claims(
        &self,
        grant: &GrantContext,
        scopes: &ScopeSet,
        kind: TokenUse,
        aud: Vec<String>,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<IssuedToken> {
        let key = self.keys.current().await;
        let iat = now.timestamp();
        let exp = iat + lifetime.num_seconds();
        let token_claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: grant.subject.subject_id.clone(),
            aud,
            exp,
            iat,
            jti: Uuid::new_v4().to_string(),
            client_id: grant.client.client_id.clone(),
            scope: scopes.to_string(),
            token_use: kind,
            azid: Some(grant.authorization_id.clone()),
            auth_time: grant.auth_time.map(|at| at.timestamp()),
        };
        let value = key.sign(expected_typ(kind), &token_claims)?;

        Ok(IssuedToken {
            value,
            token_id: token_claims.jti,
            kind,
            subject_id: token_claims.sub,
            client_id: token_claims.client_id,
            scopes: scopes.clone(),
            issued_at: from_timestamp(iat)?,
            expires_at: from_timestamp(exp)?,
            key_id: key.kid.clone(),
        })
    }
}

/// Base64url of the left half of SHA-256 (OIDC `at_hash` for RS256)
#[must_use]
pub fn left_half_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_half_hash_length() {
        // 16 bytes -> 22 base64url characters
        assert_eq!(left_half_hash("token").len(), 22);
        assert_ne!(left_half_hash("a"), left_half_hash("b"));
    }
}
