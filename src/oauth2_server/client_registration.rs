// ABOUTME: Client registry: registration, lookup, and secret verification of OAuth 2.0 clients
// ABOUTME: Validates redirect URIs, grants, and scopes; secrets are stored as Argon2id hashes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::constants::scopes;
use crate::crypto::{generate_random_string, random::CODE_BYTES, SecretHasher};
use crate::database_plugins::SharedDatabase;
use crate::errors::{ClientError, ErrorCode};
use crate::models::{Client, ClientType, ConsentType, GrantType, ScopeSet};
use crate::oauth2_server::encryption;

/// Client registration input
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistration {
    /// Requested identifier; generated when absent
    #[serde(default)]
    pub client_id: Option<String>,
    /// Public or confidential
    pub client_type: ClientType,
    /// Secret to register for a confidential client; generated when absent
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Name shown on consent pages
    #[serde(default)]
    pub display_name: Option<String>,
    /// Allowed grants
    pub allowed_grant_types: BTreeSet<GrantType>,
    /// Exact-match redirect URIs
    #[serde(default)]
    pub redirect_uris: BTreeSet<String>,
    /// Exact-match logout redirect URIs
    #[serde(default)]
    pub post_logout_redirect_uris: BTreeSet<String>,
    /// Scopes the client may request
    pub allowed_scopes: ScopeSet,
    /// Require PKCE at the authorization endpoint (always on for public clients)
    #[serde(default)]
    pub requires_pkce: bool,
    /// Consent behaviour
    #[serde(default)]
    pub consent_type: ConsentType,
    /// Access token lifetime override
    #[serde(default)]
    pub access_token_lifetime_secs: Option<i64>,
    /// Return identity tokens encrypted to `encryption_key`
    #[serde(default)]
    pub requires_encryption: bool,
    /// RSA public key in PEM form, required with `requires_encryption`
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// Result of a registration
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    /// Stored client
    pub client: Client,
    /// Plaintext secret, returned exactly once (confidential clients only)
    pub client_secret: Option<String>,
}

/// Registry of client applications backed by the database
#[derive(Clone)]
pub struct ClientRegistry {
    database: SharedDatabase,
    hasher: SecretHasher,
}

impl ClientRegistry {
    /// Creates a new client registry
    #[must_use]
    pub const fn new(database: SharedDatabase, hasher: SecretHasher) -> Self {
        Self { database, hasher }
    }

    /// Register a client and return its identifier and secret
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the registration is invalid or the id is taken
    pub async fn register(
        &self,
        registration: ClientRegistration,
        now: DateTime<Utc>,
    ) -> Result<RegisteredClient, ClientError> {
        let confidential = matches!(registration.client_type, ClientType::Confidential);
        let client_secret = match (confidential, registration.client_secret) {
            (true, Some(secret)) => Some(secret),
            (true, None) => Some(generate_random_string(CODE_BYTES)?),
            (false, Some(_)) => {
                return Err(ClientError::InvalidMetadata {
                    reason: "public clients cannot have a secret",
                })
            }
            (false, None) => None,
        };
        let secret_hash = match client_secret.as_deref() {
            Some(secret) => Some(self.hasher.hash(secret).await?),
            None => None,
        };

        let client_id = registration
            .client_id
            .unwrap_or_else(|| format!("client_{}", Uuid::new_v4().simple()));

        let client = Client {
            client_id,
            client_type: registration.client_type,
            secret_hash,
            display_name: registration.display_name,
            allowed_grant_types: registration.allowed_grant_types,
            redirect_uris: registration.redirect_uris,
            post_logout_redirect_uris: registration.post_logout_redirect_uris,
            allowed_scopes: registration.allowed_scopes,
            requires_pkce: registration.requires_pkce || !confidential,
            consent_type: registration.consent_type,
            access_token_lifetime_secs: registration.access_token_lifetime_secs,
            requires_encryption: registration.requires_encryption,
            encryption_key: registration.encryption_key,
            created_at: now,
            updated_at: now,
        };
        Self::validate_client(&client)?;

        self.database.create_client(&client).await.map_err(|e| {
            if e.code == ErrorCode::ResourceAlreadyExists {
                ClientError::AlreadyRegistered {
                    client_id: client.client_id.clone(),
                }
            } else {
                ClientError::Storage(e)
            }
        })?;

        info!(
            client_id = %client.client_id,
            client_type = client.client_type.as_str(),
            "Registered OAuth client"
        );
        Ok(RegisteredClient {
            client,
            client_secret,
        })
    }

    /// Look up a registered client
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for unknown ids
    pub async fn lookup(&self, client_id: &str) -> Result<Client, ClientError> {
        self.database
            .get_client(client_id)
            .await?
            .ok_or_else(|| ClientError::NotFound {
                client_id: client_id.to_owned(),
            })
    }

    /// Whether `secret` is the client's secret (constant-time Argon2 verification)
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for unknown ids
    pub async fn verify_secret(&self, client_id: &str, secret: &str) -> Result<bool, ClientError> {
        let client = self.lookup(client_id).await?;
        Ok(match client.secret_hash.as_deref() {
            Some(hash) => self.hasher.verify(secret, hash).await,
            None => false,
        })
    }

    /// Authenticate a client at the token, introspection, or revocation endpoint
    ///
    /// Confidential clients must present their secret; public clients must not
    /// present one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidSecret`
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<Client, ClientError> {
        let client = self.lookup(client_id).await?;
        let authenticated = match (client.secret_hash.as_deref(), secret) {
            (Some(hash), Some(secret)) => self.hasher.verify(secret, hash).await,
            (None, None) => !client.is_confidential(),
            _ => false,
        };
        if !authenticated {
            warn!(client_id = %client_id, "OAuth client authentication failed");
            return Err(ClientError::InvalidSecret);
        }
        Ok(client)
    }

    /// Replace a client's settings; the secret and creation time are kept
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids or a validation error
    pub async fn update(
        &self,
        mut client: Client,
        now: DateTime<Utc>,
    ) -> Result<Client, ClientError> {
        let existing = self.lookup(&client.client_id).await?;
        client.secret_hash = existing.secret_hash;
        client.client_type = existing.client_type;
        client.created_at = existing.created_at;
        client.updated_at = now;
        Self::validate_client(&client)?;

        if !self.database.update_client(&client).await? {
            return Err(ClientError::NotFound {
                client_id: client.client_id,
            });
        }
        Ok(client)
    }

    /// Reject grants the client was not registered for
    ///
    /// # Errors
    ///
    /// Returns `GrantTypeNotAllowed`
    pub fn ensure_grant(client: &Client, grant_type: GrantType) -> Result<(), ClientError> {
        if client.allows_grant(grant_type) {
            Ok(())
        } else {
            Err(ClientError::GrantTypeNotAllowed {
                grant_type: grant_type.as_str().to_owned(),
            })
        }
    }

    /// Reject redirect URIs that are not registered verbatim
    ///
    /// # Errors
    ///
    /// Returns `RedirectUriMismatch`
    pub fn ensure_redirect_uri(client: &Client, redirect_uri: &str) -> Result<(), ClientError> {
        if client.has_redirect_uri(redirect_uri) {
            Ok(())
        } else {
            Err(ClientError::RedirectUriMismatch {
                uri: redirect_uri.to_owned(),
            })
        }
    }

    /// Reject scopes the client may not request
    ///
    /// # Errors
    ///
    /// Returns `ScopeNotAllowed` naming the first offending scope
    pub fn ensure_scopes(client: &Client, requested: &ScopeSet) -> Result<(), ClientError> {
        match requested.first_outside(&client.allowed_scopes) {
            Some(scope) => Err(ClientError::ScopeNotAllowed {
                scope: scope.to_owned(),
            }),
            None => Ok(()),
        }
    }

    fn validate_client(client: &Client) -> Result<(), ClientError> {
        if client.client_id.trim().is_empty() {
            return Err(ClientError::InvalidMetadata {
                reason: "client_id must not be empty",
            });
        }
        if client.allowed_grant_types.is_empty() {
            return Err(ClientError::InvalidMetadata {
                reason: "at least one grant type is required",
            });
        }
        if client.allows_grant(GrantType::AuthorizationCode) && client.redirect_uris.is_empty() {
            return Err(ClientError::InvalidMetadata {
                reason: "the authorization_code grant requires a redirect_uri",
            });
        }
        if let Some(scope) = client
            .allowed_scopes
            .iter()
            .find(|scope| !scopes::SUPPORTED.contains(scope))
        {
            return Err(ClientError::ScopeNotAllowed {
                scope: scope.to_owned(),
            });
        }
        if client.access_token_lifetime_secs.is_some_and(|secs| secs <= 0) {
            return Err(ClientError::InvalidMetadata {
                reason: "access_token_lifetime_secs must be positive",
            });
        }
        for uri in client
            .redirect_uris
            .iter()
            .chain(&client.post_logout_redirect_uris)
        {
            validate_redirect_uri(uri)?;
        }
        match (client.requires_encryption, client.encryption_key.as_deref()) {
            (true, None) => {
                return Err(ClientError::InvalidMetadata {
                    reason: "requires_encryption needs an encryption_key",
                })
            }
            (false, Some(_)) => {
                return Err(ClientError::InvalidMetadata {
                    reason: "encryption_key is only used with requires_encryption",
                })
            }
            (true, Some(pem)) => {
                if encryption::parse_public_key(pem).is_err() {
                    return Err(ClientError::InvalidMetadata {
                        reason: "encryption_key must be an RSA public key of at least 2048 bits",
                    });
                }
            }
            (false, None) => {}
        }
        Ok(())
    }
}

/// Check a redirect URI for registration
///
/// Absolute, no fragment, no wildcard; https, or http only for loopback hosts.
///
/// # Errors
///
/// Returns `InvalidRedirectUri` with the reason
pub fn validate_redirect_uri(uri: &str) -> Result<(), ClientError> {
    let invalid = |reason: &'static str| ClientError::InvalidRedirectUri {
        uri: uri.to_owned(),
        reason,
    };

    if uri.contains('*') {
        return Err(invalid("wildcards are not allowed"));
    }
    let parsed = Url::parse(uri).map_err(|_| invalid("not an absolute URI"))?;
    if parsed.fragment().is_some() {
        return Err(invalid("fragments are not allowed"));
    }
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&parsed) => Ok(()),
        "http" => Err(invalid("http is only allowed for loopback hosts")),
        _ => Err(invalid("scheme must be https")),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}
