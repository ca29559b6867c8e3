// ABOUTME: Re-exports protocol constants from oidc-core
// ABOUTME: Grant types, scopes, claim names, lifetimes, and endpoint paths
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use oidc_core::constants::*;
