// ABOUTME: Shared test helpers and utilities for integration tests
// ABOUTME: HTTP request helpers for exercising the provider router in-process
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod axum_test;
