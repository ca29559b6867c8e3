// ABOUTME: Shared database logic used by the storage backend
// ABOUTME: Row mapping and transaction retry helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Model ↔ SQL row conversion helpers
pub mod mappers;

/// Transaction retry patterns (lock contention, exponential backoff)
pub mod transactions;
