// ABOUTME: Core types and constants for the OpenID Connect provider
// ABOUTME: Foundation crate with the error taxonomy, protocol constants, and domain models
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # OIDC Core
//!
//! Foundation crate shared by the authorization server. It holds the types that
//! change rarely so the main crate recompiles independently of them.
//!
//! ## Modules
//!
//! - **errors**: `AppError`/`ErrorCode` plus the OAuth 2.0 error taxonomy
//! - **constants**: grant types, scopes, claim names, lifetimes
//! - **models**: clients, authorization requests, device authorizations, token records

/// Unified error handling and OAuth 2.0 wire errors
pub mod errors;

/// Protocol constants organized by domain
pub mod constants;

/// Domain models persisted and exchanged by the token engine
pub mod models;
