// ABOUTME: Compact JWE encryption of identity tokens for clients that require it
// ABOUTME: RSA-OAEP-256 wraps a random A256GCM content key; the plaintext is the signed JWT
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Identity token encryption
//!
//! Clients registered with `requires_encryption` receive their identity token
//! as a nested JWT: the signed JWS becomes the plaintext of a compact JWE
//! (RFC 7516) addressed to the client's RSA public key.
//!
//! Layout: `header.encrypted_key.iv.ciphertext.tag`, each part base64url.
//! The encoded protected header is the AES-GCM additional data.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::constants::encryption;
use crate::errors::{AppError, AppResult};
use crate::models::Client;

const CONTENT_KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Protected header of an encrypted identity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Key management algorithm
    pub alg: String,
    /// Content encryption algorithm
    pub enc: String,
    /// Content type of the plaintext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
}

/// Parse a client encryption key (PEM `SubjectPublicKeyInfo`)
///
/// # Errors
///
/// Returns an error if the PEM does not hold an RSA key of at least 2048 bits
pub fn parse_public_key(pem: &str) -> AppResult<RsaPublicKey> {
    let key = RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| AppError::invalid_input(format!("Invalid encryption key: {e}")))?;
    if key.size() * 8 < encryption::MIN_RSA_BITS {
        return Err(AppError::invalid_input(format!(
            "Encryption key must have at least {} bits",
            encryption::MIN_RSA_BITS
        )));
    }
    Ok(key)
}

/// Whether a token is a compact JWE rather than a compact JWS
#[must_use]
pub fn is_encrypted(token: &str) -> bool {
    token.split('.').count() == 5
}

/// Hand a signed identity token to `client`, encrypting it when required
///
/// # Errors
///
/// Returns an error if the client has no usable key or encryption fails
pub fn seal_for_client(client: &Client, signed_token: String) -> AppResult<String> {
    if !client.requires_encryption {
        return Ok(signed_token);
    }
    let pem = client.encryption_key.as_deref().ok_or_else(|| {
        AppError::crypto(format!(
            "Client {} requires encryption but has no encryption key",
            client.client_id
        ))
    })?;
    encrypt(&signed_token, &parse_public_key(pem)?)
}

/// Encrypt a signed token for one recipient
///
/// # Errors
///
/// Returns an error if key wrapping or content encryption fails
pub fn encrypt(signed_token: &str, recipient: &RsaPublicKey) -> AppResult<String> {
    let header = JweHeader {
        alg: encryption::KEY_ALGORITHM.to_owned(),
        enc: encryption::CONTENT_ALGORITHM.to_owned(),
        cty: Some(encryption::NESTED_CONTENT_TYPE.to_owned()),
    };
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

    let mut content_key = Zeroizing::new([0u8; CONTENT_KEY_LEN]);
    OsRng.fill_bytes(&mut content_key[..]);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let encrypted_key = recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &content_key[..])
        .map_err(|e| AppError::crypto(format!("Content key wrapping failed: {e}")))?;

    let cipher = Aes256Gcm::new(GenericArray::from_slice(&content_key[..]));
    let sealed = cipher
        .encrypt(
            GenericArray::from_slice(&iv),
            Payload {
                msg: signed_token.as_bytes(),
                aad: protected.as_bytes(),
            },
        )
        .map_err(|e| AppError::crypto(format!("Identity token encryption failed: {e}")))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len().saturating_sub(TAG_LEN));

    Ok(format!(
        "{protected}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(encrypted_key),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag)
    ))
}

/// Recover the signed token from a compact JWE
///
/// # Errors
///
/// Returns an error for malformed input, unsupported algorithms, the wrong
/// key, or a failed authentication tag
pub fn decrypt(token: &str, recipient: &RsaPrivateKey) -> AppResult<String> {
    let parts: Vec<&str> = token.split('.').collect();
    let &[protected, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
        return Err(AppError::invalid_input("Token is not a compact JWE"));
    };
    let decode = |part: &str| {
        URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|e| AppError::invalid_input(format!("Invalid JWE segment: {e}")))
    };

    let header: JweHeader = serde_json::from_slice(&decode(protected)?)?;
    if header.alg != encryption::KEY_ALGORITHM || header.enc != encryption::CONTENT_ALGORITHM {
        return Err(AppError::invalid_input(format!(
            "Unsupported JWE algorithms {}/{}",
            header.alg, header.enc
        )));
    }
    let iv = decode(iv)?;
    if iv.len() != IV_LEN {
        return Err(AppError::invalid_input("JWE initialization vector has the wrong length"));
    }

    let content_key = Zeroizing::new(
        recipient
            .decrypt(Oaep::new::<Sha256>(), &decode(encrypted_key)?)
            .map_err(|e| AppError::crypto(format!("Content key unwrapping failed: {e}")))?,
    );
    if content_key.len() != CONTENT_KEY_LEN {
        return Err(AppError::crypto("Unwrapped content key has the wrong length"));
    }

    let mut sealed = decode(ciphertext)?;
    sealed.extend_from_slice(&decode(tag)?);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&content_key));
    let plaintext = cipher
        .decrypt(
            GenericArray::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| AppError::crypto("JWE authentication failed"))?;
    String::from_utf8(plaintext)
        .map_err(|e| AppError::invalid_input(format!("JWE plaintext is not UTF-8: {e}")))
}
