// ABOUTME: Secure random generation of opaque codes, secrets, and device user codes
// ABOUTME: Uses ring's SystemRandom so a broken RNG fails closed instead of producing weak codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::{engine::general_purpose, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::error;

use crate::constants::user_code;
use crate::errors::{AppError, AppResult};

/// Bytes of entropy in authorization codes, device codes, and client secrets
pub const CODE_BYTES: usize = 32;

fn fill(bytes: &mut [u8]) -> AppResult<()> {
    SystemRandom::new().fill(bytes).map_err(|e| {
        error!(
            "CRITICAL: SystemRandom failed - cannot generate secure random bytes: {}",
            e
        );
        AppError::internal("System RNG failure - server cannot operate securely")
    })
}

/// `length` random bytes as unpadded base64url
///
/// # Errors
///
/// Returns an error if the system RNG fails
pub fn generate_random_string(length: usize) -> AppResult<String> {
    let mut bytes = vec![0u8; length];
    fill(&mut bytes)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
}

/// `XXXX-XXXX` user code over the consonant alphabet (RFC 8628 Section 6.1)
///
/// # Errors
///
/// Returns an error if the system RNG fails
pub fn generate_user_code() -> AppResult<String> {
    let alphabet = user_code::ALPHABET;
    let length = user_code::GROUP_LENGTH * user_code::GROUPS;
    let mut code = String::with_capacity(length + user_code::GROUPS - 1);
    let mut byte = [0u8; 1];

    let mut produced = 0;
    while produced < length {
        fill(&mut byte)?;
        // Rejection sampling keeps the distribution uniform (256 is not a multiple of 20)
        let limit = u8::try_from(256 - 256 % alphabet.len()).unwrap_or(u8::MAX);
        if byte[0] >= limit {
            continue;
        }
        if produced > 0 && produced % user_code::GROUP_LENGTH == 0 {
            code.push('-');
        }
        code.push(char::from(alphabet[usize::from(byte[0]) % alphabet.len()]));
        produced += 1;
    }
    Ok(code)
}

/// Canonical form of a user-typed code: uppercase, separators stripped, regrouped
///
/// Returns `None` if the input cannot be a code we issued.
#[must_use]
pub fn normalize_user_code(input: &str) -> Option<String> {
    let chars: Vec<char> = input
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if chars.len() != user_code::GROUP_LENGTH * user_code::GROUPS
        || !chars
            .iter()
            .all(|c| u8::try_from(*c).is_ok_and(|b| user_code::ALPHABET.contains(&b)))
    {
        return None;
    }

    Some(
        chars
            .chunks(user_code::GROUP_LENGTH)
            .map(|group| group.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("-"),
    )
}
