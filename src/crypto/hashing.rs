// ABOUTME: Argon2id hashing and verification of client secrets and user passwords
// ABOUTME: Stores PHC strings so cost parameters travel with each hash
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::sync::{Arc, OnceLock};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tokio::task;
use tracing::error;

use crate::errors::{AppError, AppResult};

/// Secret hashed once per hasher and checked when the account does not exist
const ABSENT_ACCOUNT_SECRET: &str = "absent-account-placeholder";

/// Argon2id hasher with configurable cost
///
/// Hashing and verification run on the blocking thread pool so slow
/// Argon2 work never stalls the async workers.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    absent_hash: Arc<OnceLock<String>>,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self::from_argon2(Argon2::default())
    }
}

impl fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

impl SecretHasher {
    fn from_argon2(argon2: Argon2<'static>) -> Self {
        Self {
            argon2,
            absent_hash: Arc::new(OnceLock::new()),
        }
    }

    /// Hasher with explicit cost (memory in KiB)
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are outside Argon2 limits
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> AppResult<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::config(format!("Invalid Argon2 parameters: {e}")))?;
        Ok(Self::from_argon2(Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            params,
        )))
    }

    /// Hash a secret into a PHC string with a random salt
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails or the blocking task is lost
    pub async fn hash(&self, secret: &str) -> AppResult<String> {
        let hasher = self.clone();
        let secret = secret.to_owned();
        task::spawn_blocking(move || hasher.hash_now(&secret))
            .await
            .map_err(|e| AppError::internal(format!("Password hashing task failed: {e}")))?
    }

    /// Verify a secret against a stored PHC string
    ///
    /// A malformed stored hash or a lost blocking task verifies as `false`.
    pub async fn verify(&self, secret: &str, phc_hash: &str) -> bool {
        let hasher = self.clone();
        let secret = secret.to_owned();
        let phc_hash = phc_hash.to_owned();
        task::spawn_blocking(move || hasher.verify_now(&secret, &phc_hash))
            .await
            .unwrap_or(false)
    }

    /// Spend one verification on an account that does not exist
    ///
    /// Always `false`. Keeps unknown usernames as slow as wrong passwords.
    pub async fn verify_absent(&self, secret: &str) -> bool {
        let hasher = self.clone();
        let secret = secret.to_owned();
        task::spawn_blocking(move || {
            let absent = hasher
                .absent_hash
                .get_or_init(|| hasher.hash_now(ABSENT_ACCOUNT_SECRET).unwrap_or_default());
            hasher.verify_now(&secret, absent);
            false
        })
        .await
        .unwrap_or(false)
    }

    fn hash_now(&self, secret: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::crypto(format!("Argon2 password hashing failed: {e}")))
    }

    fn verify_now(&self, secret: &str, phc_hash: &str) -> bool {
        let parsed = match PasswordHash::new(phc_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Failed to parse stored password hash: {}", e);
                return false;
            }
        };
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn absent_hash_ready(&self) -> bool {
        self.absent_hash.get().is_some()
    }
}
