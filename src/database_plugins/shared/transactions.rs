// ABOUTME: Transaction retry with exponential backoff and an RAII rollback guard
// ABOUTME: Keeps multi-statement writes all-or-nothing and rides out SQLite lock contention
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Transaction helpers
//!
//! `TransactionGuard` rolls back unless `commit()` is reached, so an early
//! `?` or a dropped future never leaves half of a multi-statement write behind.
//!
//! ```text
//! retry_transaction(|| async {
//!     let mut guard = TransactionGuard::new(pool.begin().await?);
//!     sqlx::query("UPDATE refresh_tokens ...").execute(guard.executor()?).await?;
//!     sqlx::query("INSERT INTO refresh_tokens ...").execute(guard.executor()?).await?;
//!     guard.commit().await
//! }, DEFAULT_MAX_RETRIES).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use sqlx::{Database, Transaction};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::errors::{AppError, AppResult, ErrorCode};

/// Retries used on issuance paths and by the sweeper
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry an operation while it fails with a transient storage error
///
/// Backoff doubles from 10ms: 20ms, 40ms, 80ms, ... Non-transient errors
/// (constraint violations, missing rows, bad input) are returned at once.
///
/// # Errors
///
/// Returns the last error once `max_retries` retries are spent, or the first
/// non-retryable error
pub async fn retry_transaction<F, Fut, T>(mut f: F, max_retries: u32) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempts = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable_error(&e) => {
                debug!(error = %e, "Transaction failed with non-retryable error");
                return Err(e);
            }
            Err(e) => {
                if attempts >= max_retries {
                    error!(
                        attempts = attempts + 1,
                        max_retries = max_retries,
                        error = %e,
                        "Transaction failed after max retries"
                    );
                    return Err(e);
                }
                attempts += 1;
                let backoff_ms = 10 * (1_u64 << attempts);
                warn!(
                    attempt = attempts,
                    max_retries = max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Transaction failed with retryable error, retrying after backoff"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Whether an error is worth retrying
///
/// Locking and timeouts are transient; constraint violations never are.
fn is_retryable_error(error: &AppError) -> bool {
    let message = error.message.to_lowercase();
    if message.contains("constraint") {
        return false;
    }
    if error.code.is_transient() {
        return true;
    }
    error.code == ErrorCode::DatabaseError
        && (message.contains("database is locked")
            || message.contains("busy")
            || message.contains("timed out"))
}

/// RAII guard for database transactions ensuring rollback on drop
pub struct TransactionGuard<'c, DB: Database> {
    transaction: Option<Transaction<'c, DB>>,
}

impl<'c, DB: Database> TransactionGuard<'c, DB> {
    /// Wrap a transaction obtained from `pool.begin()`
    #[must_use]
    pub const fn new(transaction: Transaction<'c, DB>) -> Self {
        Self {
            transaction: Some(transaction),
        }
    }

    /// Commit the transaction and consume the guard
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails or the guard was already consumed
    pub async fn commit(mut self) -> AppResult<()> {
        match self.transaction.take() {
            Some(tx) => {
                tx.commit().await.map_err(AppError::from)?;
                debug!("Transaction committed");
                Ok(())
            }
            None => Err(AppError::internal(
                "Transaction already consumed - cannot commit",
            )),
        }
    }

    /// Roll back the transaction and consume the guard
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails or the guard was already consumed
    pub async fn rollback(mut self) -> AppResult<()> {
        match self.transaction.take() {
            Some(tx) => {
                tx.rollback().await.map_err(AppError::from)?;
                debug!("Transaction rolled back");
                Ok(())
            }
            None => Err(AppError::internal(
                "Transaction already consumed - cannot roll back",
            )),
        }
    }

    /// Connection for executing statements inside the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been committed
    pub fn executor(&mut self) -> AppResult<&mut <DB as Database>::Connection> {
        self.transaction.as_deref_mut().ok_or_else(|| {
            AppError::internal("Transaction already consumed - guard used after commit")
        })
    }
}

impl<DB: Database> Drop for TransactionGuard<'_, DB> {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            warn!("TransactionGuard dropped without commit - rolling back");
        }
    }
}

/// `SQLite` transaction guard
pub type SqliteTransactionGuard<'c> = TransactionGuard<'c, sqlx::Sqlite>;
