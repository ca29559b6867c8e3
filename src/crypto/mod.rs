// ABOUTME: Cryptography module for random codes and credential hashing
// ABOUTME: Centralizes RNG access and Argon2id hashing for the identity provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Cryptographic utilities

/// Argon2id hashing of client secrets and user passwords
pub mod hashing;
/// Opaque random codes from the system RNG
pub mod random;

pub use hashing::SecretHasher;
pub use random::{generate_random_string, generate_user_code, normalize_user_code};
