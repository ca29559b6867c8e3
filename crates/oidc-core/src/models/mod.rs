// ABOUTME: Domain models for the authorization and token engine
// ABOUTME: Clients, scope sets, authorization and device sessions, token records, and users
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Registered client applications and scope sets
pub mod client;
/// In-flight authorization code and device authorizations
pub mod authorization;
/// Token claims, issued tokens, and persisted token records
pub mod token;
/// Resource owners known to the identity provider
pub mod user;

pub use authorization::{
    AuthorizationRequest, ConsumeOutcome, DeviceAuthorization, DevicePoll, DeviceStatus,
    PendingAuthorization,
};
pub use client::{Client, ClientType, ConsentType, GrantType, ScopeSet};
pub use token::{
    IdTokenClaims, IssuedToken, RefreshTokenRecord, StoredSigningKey, TokenClaims, TokenUse,
};
pub use user::{Subject, UserRecord};
