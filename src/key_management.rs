// ABOUTME: Master encryption key handling for secrets stored at rest
// ABOUTME: Loads the AES-256-GCM key from configuration and seals signing key material
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Key Management
//!
//! Private signing keys never reach the database in clear text. They are
//! sealed with AES-256-GCM under the master encryption key (MEK), which is
//! supplied through `OIDC_MASTER_ENCRYPTION_KEY` as 32 base64-encoded bytes.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag`, base64 encoded.

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine};
use rand::RngCore;
use tracing::{info, warn};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;

/// Master Encryption Key (MEK)
pub struct MasterEncryptionKey {
    key: [u8; 32],
}

impl fmt::Debug for MasterEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterEncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for MasterEncryptionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl MasterEncryptionKey {
    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Decode a base64 key
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64 or not exactly 32 bytes
    pub fn from_base64(encoded_key: &str) -> Result<Self> {
        let mut key_bytes = general_purpose::STANDARD
            .decode(encoded_key.trim())
            .map_err(|e| anyhow!("Invalid base64 encoding in OIDC_MASTER_ENCRYPTION_KEY: {e}"))?;

        if key_bytes.len() != 32 {
            let len = key_bytes.len();
            key_bytes.zeroize();
            return Err(anyhow!(
                "Master encryption key must be exactly 32 bytes, got {len} bytes"
            ));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        key_bytes.zeroize();
        Ok(Self { key })
    }

    /// Use the configured key, or generate a throwaway one for development
    ///
    /// A generated key makes every persisted signing key unreadable after a
    /// restart, so the server then starts with a fresh key ring.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured key is malformed
    pub fn load_or_generate(configured: Option<&str>) -> Result<Self> {
        if let Some(encoded_key) = configured {
            info!("Loading master encryption key from configuration");
            return Self::from_base64(encoded_key);
        }

        warn!("OIDC_MASTER_ENCRYPTION_KEY not set");
        warn!("Generating temporary master key for development - NOT SECURE FOR PRODUCTION");
        Ok(Self::generate())
    }

    /// Fresh random key
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Base64 form, for printing a generated key once
    #[must_use]
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.key)
    }

    /// Encrypt with a random nonce, returning `nonce || ciphertext`
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow!("Encryption failed: {e}"))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt `nonce || ciphertext`
    ///
    /// # Errors
    ///
    /// Returns an error if the data is truncated or fails authentication
    pub fn decrypt(&self, encrypted_data: &[u8]) -> Result<Vec<u8>> {
        if encrypted_data.len() < NONCE_LEN {
            return Err(anyhow!("Encrypted data too short"));
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let (nonce, ciphertext) = encrypted_data.split_at(NONCE_LEN);

        cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {e}"))
    }

    /// Encrypt and base64 encode for a TEXT column
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        Ok(general_purpose::STANDARD.encode(self.encrypt(plaintext)?))
    }

    /// Reverse of [`Self::seal`]
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64 or fails authentication
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let encrypted = general_purpose::STANDARD
            .decode(sealed)
            .map_err(|e| anyhow!("Invalid base64 encoding for sealed value: {e}"))?;
        self.decrypt(&encrypted)
    }
}
