// ABOUTME: Main library entry point for the OpenID Connect provider
// ABOUTME: Authorization code with PKCE, device flow, refresh rotation, and signed JWT issuance
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

// Crate-level attributes:
// - deny(unsafe_code): Zero-tolerance unsafe policy
#![deny(unsafe_code)]

//! # OIDC Provider
//!
//! An OAuth 2.0 / OpenID Connect authorization and token server.
//!
//! ## Features
//!
//! - **Authorization code + PKCE**: single-use codes bound to client, redirect URI, and challenge
//! - **Device authorization**: user codes, polling with `slow_down`, approval through the login session
//! - **Refresh rotation**: every redemption rotates; replay revokes the whole family
//! - **Signed tokens**: RS256 JWTs with a rotating key ring and a published JWKS
//! - **Sweeper**: periodic pruning of expired codes, tokens, and retired keys
//!
//! ## Architecture
//!
//! - **`oauth2_server::client_registration`**: client registry
//! - **`oauth2_server::sessions`**: authorization session store
//! - **`oauth2_server::issuer`** / **`oauth2_server::validator`**: token issuance and validation
//! - **`oauth2_server::flows`**: grant flow controller
//! - **`oauth2_server::sweeper`**: revocation and pruning sweeper
//! - **`server`**: shared context, middleware stack, and serve loop
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oidc_provider::config::ServerConfig;
//! use oidc_provider::server::{serve, ServerContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let context = Arc::new(ServerContext::initialize(config).await?);
//!     serve(context).await
//! }
//! ```

/// Configuration management
pub mod config;

/// Protocol constants (re-exported from `oidc-core`)
pub mod constants;

/// Random codes and credential hashing
pub mod crypto;

/// Storage abstraction and the `SQLite` backend
pub mod database_plugins;

/// Unified error handling (re-exported from `oidc-core`)
pub mod errors;

/// Master encryption key for signing keys at rest
pub mod key_management;

/// Production logging and structured output
pub mod logging;

/// HTTP middleware for request correlation, CORS, and rate limiting
pub mod middleware;

/// Domain models (re-exported from `oidc-core`)
pub mod models;

/// OpenID Connect authorization server
pub mod oauth2_server;

/// YAML seeding of clients and users
pub mod seed;

/// Server assembly and serve loop
pub mod server;
