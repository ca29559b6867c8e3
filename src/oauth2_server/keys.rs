// ABOUTME: RS256 signing key ring with encrypted persistence, rotation, and JWKS export
// ABOUTME: The current key is swapped atomically; retired keys stay verifiable until pruned
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Signing key lifecycle
//!
//! Keys are generated with `rsa`, stored as AES-256-GCM sealed PKCS#8 PEM and
//! published as a JWKS. A rotation persists the new key first and only then
//! replaces the shared [`KeySet`], so concurrent signers see either the old or
//! the new set, never a mix.

use std::collections::HashMap;
use std::sync::Arc;
use std::{fmt, iter};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tokio::task;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::KeyConfig;
use crate::database_plugins::SharedDatabase;
use crate::errors::{AppError, AppResult};
use crate::key_management::MasterEncryptionKey;
use crate::logging::AppLogger;
use crate::models::StoredSigningKey;

/// JWS algorithm of every key in the ring
pub const SIGNING_ALGORITHM: &str = "RS256";

/// JWK (JSON Web Key) representation for the JWKS endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "RSA")
    pub kty: String,
    /// Public key use (always "sig")
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key ID
    pub kid: String,
    /// Algorithm (RS256)
    pub alg: String,
    /// RSA modulus (base64url)
    pub n: String,
    /// RSA exponent (base64url)
    pub e: String,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Public keys, current key first
    pub keys: Vec<JsonWebKey>,
}

/// One RSA key usable for signing and verification
#[derive(Clone)]
pub struct SigningKey {
    /// Key id (RFC 7638 thumbprint)
    pub kid: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When it stopped being the signing key
    pub retired_at: Option<DateTime<Utc>>,
    jwk: JsonWebKey,
    private_pem: Arc<Zeroizing<String>>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .field("retired_at", &self.retired_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a fresh RSA key
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails
    pub fn generate(bits: usize, created_at: DateTime<Utc>) -> AppResult<Self> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| AppError::crypto(format!("Failed to generate RSA private key: {e}")))?;
        Self::from_private_key(&private_key, created_at)
    }

    /// Wrap an existing private key
    ///
    /// # Errors
    ///
    /// Returns an error if PEM export or key construction fails
    pub fn from_private_key(
        private_key: &RsaPrivateKey,
        created_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        let public_key = RsaPublicKey::from(private_key);
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let kid = thumbprint(&n, &e);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::crypto(format!("Failed to export private key as PEM: {e}")))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::crypto(format!("Failed to export public key as PEM: {e}")))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AppError::crypto(format!("Failed to create encoding key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AppError::crypto(format!("Failed to create decoding key: {e}")))?;

        Ok(Self {
            jwk: JsonWebKey {
                kty: "RSA".to_owned(),
                key_use: "sig".to_owned(),
                kid: kid.clone(),
                alg: SIGNING_ALGORITHM.to_owned(),
                n,
                e,
            },
            kid,
            created_at,
            retired_at: None,
            private_pem: Arc::new(private_pem),
            encoding_key,
            decoding_key,
        })
    }

    /// Restore a key from its sealed storage form
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be decrypted or parsed
    pub fn from_stored(
        stored: &StoredSigningKey,
        master_key: &MasterEncryptionKey,
    ) -> AppResult<Self> {
        if stored.algorithm != SIGNING_ALGORITHM {
            return Err(AppError::crypto(format!(
                "Unsupported signing algorithm '{}'",
                stored.algorithm
            )));
        }
        let pem = master_key
            .open(&stored.encrypted_private_key)
            .map_err(|e| AppError::crypto(format!("Failed to decrypt signing key: {e:#}")))?;
        let pem = Zeroizing::new(
            String::from_utf8(pem)
                .map_err(|e| AppError::crypto(format!("Signing key is not UTF-8: {e}")))?,
        );
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| AppError::crypto(format!("Failed to parse private key PEM: {e}")))?;

        let mut key = Self::from_private_key(&private_key, stored.created_at)?;
        if key.kid != stored.kid {
            return Err(AppError::crypto(format!(
                "Stored key id '{}' does not match key material",
                stored.kid
            )));
        }
        key.retired_at = stored.retired_at;
        Ok(key)
    }

    /// Storage form, private PEM sealed under the master key
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn to_stored(&self, master_key: &MasterEncryptionKey) -> AppResult<StoredSigningKey> {
        let sealed = master_key
            .seal(self.private_pem.as_bytes())
            .map_err(|e| AppError::crypto(format!("Failed to encrypt signing key: {e:#}")))?;
        Ok(StoredSigningKey {
            kid: self.kid.clone(),
            algorithm: SIGNING_ALGORITHM.to_owned(),
            encrypted_private_key: sealed,
            created_at: self.created_at,
            retired_at: self.retired_at,
        })
    }

    /// Public JWK
    #[must_use]
    pub const fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    /// Verification key
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Sign `claims` as a compact JWS with this key's `kid` and the given `typ`
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or signing fails
    pub fn sign<T: Serialize>(&self, typ: &str, claims: &T) -> AppResult<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        header.typ = Some(typ.to_owned());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| AppError::crypto(format!("Failed to sign token: {e}")))
    }

    fn retired(&self, at: DateTime<Utc>) -> Self {
        let mut key = self.clone();
        key.retired_at = Some(at);
        key
    }
}

/// RFC 7638 JWK thumbprint
fn thumbprint(n: &str, e: &str) -> String {
    // Members in lexicographic order, no whitespace
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// Immutable snapshot of the ring
#[derive(Debug, Clone)]
pub struct KeySet {
    current: Arc<SigningKey>,
    verification: HashMap<String, Arc<SigningKey>>,
}

impl KeySet {
    fn new(current: SigningKey, retained: impl IntoIterator<Item = SigningKey>) -> Self {
        let current = Arc::new(current);
        let mut verification: HashMap<String, Arc<SigningKey>> = retained
            .into_iter()
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();
        verification.insert(current.kid.clone(), Arc::clone(&current));
        Self {
            current,
            verification,
        }
    }

    /// Key used for new signatures
    #[must_use]
    pub fn current(&self) -> Arc<SigningKey> {
        Arc::clone(&self.current)
    }

    /// Key with id `kid`, current or retained
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.verification.get(kid).cloned()
    }

    /// Number of verification keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.verification.len()
    }

    /// Always false, a set has a current key
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.verification.is_empty()
    }

    /// Public keys, current first then newest to oldest
    #[must_use]
    pub fn jwks(&self) -> JsonWebKeySet {
        let mut retained: Vec<&Arc<SigningKey>> = self
            .verification
            .values()
            .filter(|key| key.kid != self.current.kid)
            .collect();
        retained.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let keys = iter::once(&self.current)
            .chain(retained)
            .map(|key| key.jwk().clone())
            .collect();
        JsonWebKeySet { keys }
    }
}

/// Shared key ring: the current-key pointer plus retained verification keys
pub struct KeyRing {
    database: SharedDatabase,
    master_key: Arc<MasterEncryptionKey>,
    config: KeyConfig,
    state: RwLock<Arc<KeySet>>,
    rotation: Mutex<()>,
}

impl KeyRing {
    /// Load retained keys or create the first one
    ///
    /// Keys that cannot be decrypted (for example after a master key change)
    /// are skipped with a warning rather than failing startup.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or no key can be created
    pub async fn load_or_create(
        database: SharedDatabase,
        master_key: Arc<MasterEncryptionKey>,
        config: KeyConfig,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let retention = Duration::seconds(config.retention_secs);
        let mut usable = Vec::new();
        for stored in database.list_signing_keys().await? {
            if stored.retired_at.is_some_and(|at| at + retention < now) {
                continue;
            }
            match SigningKey::from_stored(&stored, &master_key) {
                Ok(key) => usable.push(key),
                Err(e) => warn!(kid = %stored.kid, error = %e, "Skipping unusable signing key"),
            }
        }

        // Oldest first, so the newest active key wins
        let current_index = usable.iter().rposition(|key| key.retired_at.is_none());
        let set = if let Some(index) = current_index {
            let current = usable.remove(index);
            info!(kid = %current.kid, retained = usable.len(), "Loaded signing keys");
            KeySet::new(current, usable)
        } else {
            let current = generate_key(config.rsa_key_bits, now).await?;
            database
                .store_signing_key(&current.to_stored(&master_key)?)
                .await?;
            info!(kid = %current.kid, "Created initial signing key");
            KeySet::new(current, usable)
        };

        Ok(Self {
            database,
            master_key,
            config,
            state: RwLock::new(Arc::new(set)),
            rotation: Mutex::new(()),
        })
    }

    /// Consistent snapshot for one signing or validation call
    pub async fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&*self.state.read().await)
    }

    /// Current signing key
    pub async fn current(&self) -> Arc<SigningKey> {
        self.snapshot().await.current()
    }

    /// Published key set
    pub async fn jwks(&self) -> JsonWebKeySet {
        self.snapshot().await.jwks()
    }

    /// Generate and install a new signing key
    ///
    /// # Errors
    ///
    /// Returns an error if generation or persistence fails; the ring is unchanged then
    pub async fn rotate(&self, now: DateTime<Utc>) -> AppResult<String> {
        let key = generate_key(self.config.rsa_key_bits, now).await?;
        self.rotate_with(key, now).await
    }

    /// Install `key` as the signing key, retiring the current one
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails; the ring is unchanged then
    pub async fn rotate_with(&self, key: SigningKey, now: DateTime<Utc>) -> AppResult<String> {
        let _guard = self.rotation.lock().await;
        let previous = self.snapshot().await;
        let previous_kid = previous.current.kid.clone();

        self.database
            .rotate_signing_key(&key.to_stored(&self.master_key)?, &previous_kid, now)
            .await?;

        let retained = previous.verification.values().map(|existing| {
            if existing.kid == previous_kid {
                existing.retired(now)
            } else {
                existing.as_ref().clone()
            }
        });
        let new_kid = key.kid.clone();
        let next = Arc::new(KeySet::new(key, retained.collect::<Vec<_>>()));
        *self.state.write().await = next;

        AppLogger::log_key_rotated(&new_kid, Some(&previous_kid));
        Ok(new_kid)
    }

    /// Rotate when the current key is older than the rotation interval
    ///
    /// # Errors
    ///
    /// Returns an error if rotation fails
    pub async fn rotate_if_due(&self, now: DateTime<Utc>) -> AppResult<bool> {
        let current = self.current().await;
        let due_at = current.created_at + Duration::days(self.config.rotation_interval_days);
        if now < due_at {
            return Ok(false);
        }
        self.rotate(now).await?;
        Ok(true)
    }

    /// Drop retired keys whose retention window has passed
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    pub async fn prune(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let _guard = self.rotation.lock().await;
        let retention = Duration::seconds(self.config.retention_secs);
        let snapshot = self.snapshot().await;

        let expired: Vec<String> = snapshot
            .verification
            .values()
            .filter(|key| key.retired_at.is_some_and(|at| at + retention < now))
            .map(|key| key.kid.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        for kid in &expired {
            self.database.delete_signing_key(kid).await?;
        }
        let retained = snapshot
            .verification
            .values()
            .filter(|key| key.kid != snapshot.current.kid && !expired.contains(&key.kid))
            .map(|key| key.as_ref().clone())
            .collect::<Vec<_>>();
        let next = Arc::new(KeySet::new(snapshot.current.as_ref().clone(), retained));
        *self.state.write().await = next;

        info!(pruned = expired.len(), "Pruned retired signing keys");
        Ok(expired.len())
    }
}

/// RSA generation is CPU-bound; keep it off the async workers
async fn generate_key(bits: usize, now: DateTime<Utc>) -> AppResult<SigningKey> {
    task::spawn_blocking(move || SigningKey::generate(bits, now))
        .await
        .map_err(|e| AppError::internal(format!("Key generation task failed: {e}")))?
}
