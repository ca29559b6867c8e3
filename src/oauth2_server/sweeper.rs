// ABOUTME: Periodic pruning of expired authorizations, tokens, and retired signing keys
// ABOUTME: One tokio task driven by an interval and stopped through a watch channel
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SweeperConfig;
use crate::database_plugins::shared::transactions::{retry_transaction, DEFAULT_MAX_RETRIES};
use crate::database_plugins::SharedDatabase;
use crate::errors::{AppError, AppResult};
use crate::logging::AppLogger;
use crate::oauth2_server::keys::KeyRing;
use crate::oauth2_server::sessions::AuthorizationSessionStore;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired authorization codes removed
    pub authorization_codes: u64,
    /// Expired device authorizations removed
    pub device_authorizations: u64,
    /// Expired or long-revoked refresh tokens removed
    pub refresh_tokens: u64,
    /// Denylist entries whose access token has expired
    pub access_token_revocations: u64,
    /// Retired signing keys dropped
    pub keys_pruned: usize,
    /// Whether the current signing key was replaced
    pub key_rotated: bool,
    /// Steps that still failed after retrying
    pub failed_steps: Vec<&'static str>,
}

impl SweepReport {
    /// Total rows and keys removed
    #[must_use]
    pub const fn removed(&self) -> u64 {
        self.authorization_codes
            + self.device_authorizations
            + self.refresh_tokens
            + self.access_token_revocations
            + self.keys_pruned as u64
    }
}

/// Removes what can no longer be redeemed
///
/// Deletions only match rows with `expires_at < now`, while consumption only
/// matches `expires_at >= now`, so a pass never races an in-flight exchange.
#[derive(Clone)]
pub struct Sweeper {
    sessions: AuthorizationSessionStore,
    database: SharedDatabase,
    keys: Arc<KeyRing>,
    config: SweeperConfig,
}

impl Sweeper {
    /// Creates a new sweeper
    #[must_use]
    pub const fn new(
        sessions: AuthorizationSessionStore,
        database: SharedDatabase,
        keys: Arc<KeyRing>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            sessions,
            database,
            keys,
            config,
        }
    }

    /// Run one pass
    ///
    /// A failing step is retried with backoff, then recorded in
    /// [`SweepReport::failed_steps`] without stopping the remaining steps.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        match retry_transaction(|| self.sessions.gc(now), DEFAULT_MAX_RETRIES).await {
            Ok(gc) => {
                report.authorization_codes = gc.authorization_codes;
                report.device_authorizations = gc.device_authorizations;
            }
            Err(e) => Self::record_failure(&mut report, "authorizations", &e),
        }

        let revoked_before = now - ChronoDuration::seconds(self.config.revoked_retention_secs);
        match retry_transaction(
            || {
                self.database
                    .delete_stale_refresh_tokens(now, revoked_before)
            },
            DEFAULT_MAX_RETRIES,
        )
        .await
        {
            Ok(removed) => report.refresh_tokens = removed,
            Err(e) => Self::record_failure(&mut report, "refresh_tokens", &e),
        }

        match retry_transaction(
            || self.database.delete_expired_access_token_revocations(now),
            DEFAULT_MAX_RETRIES,
        )
        .await
        {
            Ok(removed) => report.access_token_revocations = removed,
            Err(e) => Self::record_failure(&mut report, "access_token_revocations", &e),
        }

        match retry_transaction(|| self.keys.rotate_if_due(now), DEFAULT_MAX_RETRIES).await {
            Ok(rotated) => report.key_rotated = rotated,
            Err(e) => Self::record_failure(&mut report, "key_rotation", &e),
        }

        match retry_transaction(|| self.keys.prune(now), DEFAULT_MAX_RETRIES).await {
            Ok(pruned) => report.keys_pruned = pruned,
            Err(e) => Self::record_failure(&mut report, "key_pruning", &e),
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match serde_json::to_value(&report) {
            Ok(summary) => AppLogger::log_sweep_finished(&summary, duration_ms),
            Err(e) => error!(error = %e, "Failed to serialize sweep report"),
        }
        report
    }

    /// Sweep every `interval` until `shutdown` turns `true`
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            "Starting revocation and pruning sweeper"
        );
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Sweeper received shutdown signal");
                        break;
                    }
                }
            }
        }
    }

    fn record_failure(
        report: &mut SweepReport,
        step: &'static str,
        error: &AppError,
    ) {
        error!(step, error = %error, "Sweep step failed after retries");
        report.failed_steps.push(step);
    }
}

/// Run a single pass and return its report
///
/// # Errors
///
/// Returns an error naming the failed steps when any step failed
pub async fn sweep_once(sweeper: &Sweeper) -> AppResult<SweepReport> {
    let report = sweeper.sweep(Utc::now()).await;
    if report.failed_steps.is_empty() {
        Ok(report)
    } else {
        Err(AppError::internal(format!(
            "Sweep steps failed: {}",
            report.failed_steps.join(", ")
        )))
    }
}
