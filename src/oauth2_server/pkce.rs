// ABOUTME: PKCE (RFC 7636) challenge validation and verifier checking
// ABOUTME: Only S256 is accepted; comparison is constant-time
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::pkce;
use crate::errors::GrantError;

/// Supported code challenge methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceMethod {
    /// `BASE64URL(SHA256(verifier))`
    S256,
}

impl PkceMethod {
    /// Parse `code_challenge_method`; it must be sent explicitly and `plain` is refused
    #[must_use]
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            Some(pkce::METHOD_S256) => Some(Self::S256),
            None | Some(_) => None,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => pkce::METHOD_S256,
        }
    }
}

/// Characters allowed in verifiers (RFC 7636 Section 4.1)
fn is_unreserved(c: char) -> bool {
    matches!(c, 'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '.' | '_' | '~')
}

/// Whether `value` has verifier syntax: 43-128 unreserved characters
#[must_use]
pub fn is_valid_verifier(value: &str) -> bool {
    (pkce::MIN_LENGTH..=pkce::MAX_LENGTH).contains(&value.len()) && value.chars().all(is_unreserved)
}

/// Whether `value` is a plausible S256 challenge (43 base64url characters)
#[must_use]
pub fn is_valid_challenge(value: &str) -> bool {
    value.len() == pkce::MIN_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// S256 challenge of a verifier
#[must_use]
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Check a presented verifier against what was stored with the code
///
/// A stored challenge demands a matching verifier; no stored challenge
/// forbids sending one.
///
/// # Errors
///
/// Returns the `GrantError` describing the mismatch
pub fn verify(
    stored_challenge: Option<&str>,
    stored_method: Option<&str>,
    code_verifier: Option<&str>,
) -> Result<(), GrantError> {
    let Some(challenge) = stored_challenge else {
        return if code_verifier.is_some() {
            Err(GrantError::PkceUnexpectedVerifier)
        } else {
            Ok(())
        };
    };

    let verifier = code_verifier.ok_or(GrantError::PkceVerifierMissing)?;
    if !is_valid_verifier(verifier) {
        return Err(GrantError::PkceVerifierMalformed);
    }
    if PkceMethod::parse(stored_method).is_none() {
        return Err(GrantError::PkceMismatch);
    }

    let computed = compute_challenge(verifier);
    if computed.as_bytes().ct_eq(challenge.as_bytes()).into() {
        Ok(())
    } else {
        Err(GrantError::PkceMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc_vector() {
        assert_eq!(compute_challenge(VERIFIER), CHALLENGE);
        assert!(is_valid_challenge(CHALLENGE));
        verify(Some(CHALLENGE), Some("S256"), Some(VERIFIER)).unwrap();
    }

    #[test]
    fn test_mismatch_and_missing_verifier() {
        let other = "x".repeat(43);
        assert_eq!(
            verify(Some(CHALLENGE), Some("S256"), Some(&other)),
            Err(GrantError::PkceMismatch)
        );
        assert_eq!(
            verify(Some(CHALLENGE), Some("S256"), None),
            Err(GrantError::PkceVerifierMissing)
        );
    }

    #[test]
    fn test_verifier_syntax() {
        assert!(!is_valid_verifier("short"));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}!", "a".repeat(43))));
        assert!(is_valid_verifier(&"a~._-".repeat(10)));
        assert_eq!(
            verify(Some(CHALLENGE), None, Some("short")),
            Err(GrantError::PkceVerifierMalformed)
        );
    }

    #[test]
    fn test_challenge_without_method_is_refused() {
        assert_eq!(PkceMethod::parse(None), None);
        assert_eq!(
            verify(Some(CHALLENGE), None, Some(VERIFIER)),
            Err(GrantError::PkceMismatch)
        );
    }

    #[test]
    fn test_verifier_without_challenge_is_rejected() {
        verify(None, None, None).unwrap();
        assert_eq!(
            verify(None, None, Some(VERIFIER)),
            Err(GrantError::PkceUnexpectedVerifier)
        );
    }

    #[test]
    fn test_plain_method_is_refused() {
        assert_eq!(PkceMethod::parse(Some("plain")), None);
        assert_eq!(PkceMethod::parse(Some("s256")), None);
        assert_eq!(PkceMethod::parse(Some("S256")), Some(PkceMethod::S256));
        assert_eq!(PkceMethod::S256.as_str(), "S256");
    }
}
