// ABOUTME: Re-exports the error taxonomy from oidc-core for unified type identity
// ABOUTME: Ensures AppError and the OAuth 2.0 errors are the same type across workspace crates
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use oidc_core::errors::*;
