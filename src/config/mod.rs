// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Re-exports the environment-driven server configuration types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module
//!
//! All settings come from environment variables (optionally loaded from a
//! `.env` file); see [`environment::ServerConfig::from_env`].

/// Environment and server configuration
pub mod environment;

pub use environment::{
    DatabaseConfig, DatabaseUrl, HttpConfig, KeyConfig, RateLimitConfig, ServerConfig,
    SweeperConfig, TokenLifetimes,
};
