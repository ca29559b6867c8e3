// ABOUTME: Re-exports domain models from oidc-core for unified type identity
// ABOUTME: Clients, scopes, authorization requests, device authorizations, and token records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use oidc_core::models::*;
