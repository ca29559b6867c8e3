// ABOUTME: Authorization session store for single-use authorization codes and device authorizations
// ABOUTME: Generates opaque codes, stores them with a TTL, and consumes them at most once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Authorization session store
//!
//! Every state change is a single conditional statement in the database, so
//! concurrent `/token` calls for the same code or device code cannot both win.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TokenLifetimes;
use crate::constants::lifetimes;
use crate::crypto::{generate_random_string, generate_user_code, normalize_user_code, random::CODE_BYTES};
use crate::database_plugins::shared::transactions::{retry_transaction, DEFAULT_MAX_RETRIES};
use crate::database_plugins::SharedDatabase;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::{
    AuthorizationRequest, ConsumeOutcome, DeviceAuthorization, DevicePoll, DeviceStatus,
    PendingAuthorization, ScopeSet,
};

/// Attempts at drawing an unused user code
const USER_CODE_ATTEMPTS: usize = 5;

/// Entries removed by one garbage collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Expired authorization codes
    pub authorization_codes: u64,
    /// Expired device authorizations
    pub device_authorizations: u64,
}

/// Store for in-flight authorizations
#[derive(Clone)]
pub struct AuthorizationSessionStore {
    database: SharedDatabase,
    code_lifetime: Duration,
    device_lifetime: Duration,
    poll_interval_secs: i64,
}

impl AuthorizationSessionStore {
    /// Creates a new session store
    #[must_use]
    pub fn new(database: SharedDatabase, lifetimes: &TokenLifetimes) -> Self {
        Self {
            database,
            code_lifetime: Duration::seconds(lifetimes.authorization_code_secs),
            device_lifetime: Duration::seconds(lifetimes.device_code_secs),
            poll_interval_secs: lifetimes.device_poll_interval_secs,
        }
    }

    /// Store an approved authorization under a fresh 256-bit code
    ///
    /// # Errors
    ///
    /// Returns an error if randomness or storage fails
    pub async fn create(
        &self,
        pending: PendingAuthorization,
        now: DateTime<Utc>,
    ) -> AppResult<AuthorizationRequest> {
        let request = AuthorizationRequest {
            code: generate_random_string(CODE_BYTES)?,
            authorization_id: Uuid::new_v4().to_string(),
            client_id: pending.client_id,
            subject_id: pending.subject_id,
            requested_scopes: pending.scopes,
            redirect_uri: pending.redirect_uri,
            code_challenge: pending.code_challenge,
            code_challenge_method: pending.code_challenge_method,
            nonce: pending.nonce,
            auth_time: pending.auth_time,
            created_at: now,
            expires_at: now + self.code_lifetime,
            consumed: false,
        };
        retry_transaction(
            || self.database.store_authorization_request(&request),
            DEFAULT_MAX_RETRIES,
        )
        .await?;
        debug!(client_id = %request.client_id, "Issued authorization code");
        Ok(request)
    }

    /// Atomically consume a code
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails after retries
    pub async fn consume(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ConsumeOutcome<AuthorizationRequest>> {
        retry_transaction(
            || self.database.consume_authorization_request(code, now),
            DEFAULT_MAX_RETRIES,
        )
        .await
    }

    /// Start a device authorization for `client_id`
    ///
    /// # Errors
    ///
    /// Returns an error if randomness or storage fails
    pub async fn create_device(
        &self,
        client_id: &str,
        scopes: ScopeSet,
        now: DateTime<Utc>,
    ) -> AppResult<DeviceAuthorization> {
        let device_code = generate_random_string(CODE_BYTES)?;
        let authorization_id = Uuid::new_v4().to_string();

        for _ in 0..USER_CODE_ATTEMPTS {
            let device = DeviceAuthorization {
                device_code: device_code.clone(),
                user_code: generate_user_code()?,
                authorization_id: authorization_id.clone(),
                client_id: client_id.to_owned(),
                scopes: scopes.clone(),
                status: DeviceStatus::Pending,
                subject_id: None,
                auth_time: None,
                created_at: now,
                expires_at: now + self.device_lifetime,
                poll_interval_secs: self.poll_interval_secs,
                last_polled_at: None,
                consumed: false,
            };
            match retry_transaction(
                || self.database.store_device_authorization(&device),
                DEFAULT_MAX_RETRIES,
            )
            .await
            {
                Ok(()) => {
                    debug!(client_id = %client_id, "Issued device code");
                    return Ok(device);
                }
                Err(e) if e.code == ErrorCode::ResourceAlreadyExists => {
                    debug!("User code collision, drawing another");
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::internal("Could not allocate a unique user code"))
    }

    /// Find a device authorization from user input (case and dash insensitive)
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    pub async fn lookup_user_code(&self, input: &str) -> AppResult<Option<DeviceAuthorization>> {
        let Some(user_code) = normalize_user_code(input) else {
            return Ok(None);
        };
        self.database
            .get_device_authorization_by_user_code(&user_code)
            .await
    }

    /// Approve a pending device authorization for `subject_id`
    ///
    /// Returns `false` if the code is unknown, expired, or already decided.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    pub async fn approve_device(
        &self,
        user_code: &str,
        subject_id: &str,
        auth_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.decide(user_code, DeviceStatus::Approved, Some(subject_id), Some(auth_time), now)
            .await
    }

    /// Deny a pending device authorization
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    pub async fn deny_device(&self, user_code: &str, now: DateTime<Utc>) -> AppResult<bool> {
        self.decide(user_code, DeviceStatus::Denied, None, None, now).await
    }

    async fn decide(
        &self,
        user_code: &str,
        decision: DeviceStatus,
        subject_id: Option<&str>,
        auth_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let Some(user_code) = normalize_user_code(user_code) else {
            return Ok(false);
        };
        let decided = retry_transaction(
            || {
                self.database.decide_device_authorization(
                    &user_code,
                    decision,
                    subject_id,
                    auth_time,
                    now,
                )
            },
            DEFAULT_MAX_RETRIES,
        )
        .await?;
        info!(
            user_code = %user_code,
            decision = decision.as_str(),
            applied = decided,
            "Device authorization decision"
        );
        Ok(decided)
    }

    /// Record one poll from the device
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails after retries
    pub async fn poll_device(
        &self,
        device_code: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<DevicePoll> {
        retry_transaction(
            || {
                self.database.poll_device_authorization(
                    device_code,
                    client_id,
                    now,
                    lifetimes::DEVICE_SLOW_DOWN_INCREMENT_SECS,
                )
            },
            DEFAULT_MAX_RETRIES,
        )
        .await
    }

    /// Remove codes and device authorizations whose `expires_at` is before `now`
    ///
    /// Anything `consume` could still match has `expires_at >= now`, so the
    /// two never touch the same row.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails
    pub async fn gc(&self, now: DateTime<Utc>) -> AppResult<GcReport> {
        Ok(GcReport {
            authorization_codes: self.database.delete_expired_authorization_requests(now).await?,
            device_authorizations: self.database.delete_expired_device_authorizations(now).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_plugins::{DatabaseProvider, SqliteDatabase};
    use std::sync::Arc;

    async fn store() -> (AuthorizationSessionStore, SharedDatabase) {
        let database = SqliteDatabase::new("sqlite::memory:").await.unwrap();
        database.migrate().await.unwrap();
        let database: SharedDatabase = Arc::new(database);
        (
            AuthorizationSessionStore::new(database.clone(), &TokenLifetimes::default()),
            database,
        )
    }

    fn pending() -> PendingAuthorization {
        PendingAuthorization {
            client_id: "c1".to_owned(),
            subject_id: "alice".to_owned(),
            scopes: ScopeSet::parse("openid"),
            redirect_uri: "https://app/cb".to_owned(),
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            auth_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_code_is_consumed_once() {
        let (store, _) = store().await;
        let now = Utc::now();
        let request = store.create(pending(), now).await.unwrap();
        assert_eq!(request.code.len(), 43);

        assert!(matches!(
            store.consume(&request.code, now).await.unwrap(),
            ConsumeOutcome::Consumed(_)
        ));
        assert!(matches!(
            store.consume(&request.code, now).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed(_)
        ));
        assert_eq!(
            store.consume("unknown", now).await.unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_code_expiry_is_inclusive() {
        let (store, _) = store().await;
        let now = Utc::now();
        let first = store.create(pending(), now).await.unwrap();
        let second = store.create(pending(), now).await.unwrap();

        assert!(matches!(
            store.consume(&first.code, first.expires_at).await.unwrap(),
            ConsumeOutcome::Consumed(_)
        ));
        assert_eq!(
            store
                .consume(&second.code, second.expires_at + Duration::seconds(1))
                .await
                .unwrap(),
            ConsumeOutcome::Expired
        );
    }

    #[tokio::test]
    async fn test_gc_only_removes_expired_entries() {
        let (store, _) = store().await;
        let now = Utc::now();
        let live = store.create(pending(), now).await.unwrap();
        store
            .create(pending(), now - Duration::hours(1))
            .await
            .unwrap();

        let report = store.gc(now).await.unwrap();
        assert_eq!(report.authorization_codes, 1);
        assert!(matches!(
            store.consume(&live.code, now).await.unwrap(),
            ConsumeOutcome::Consumed(_)
        ));
    }

    #[tokio::test]
    async fn test_device_approval_and_single_consumption() {
        let (store, _) = store().await;
        let now = Utc::now();
        let device = store
            .create_device("tv", ScopeSet::parse("openid"), now)
            .await
            .unwrap();

        assert_eq!(
            store.poll_device(&device.device_code, "tv", now).await.unwrap(),
            DevicePoll::Pending
        );

        let typed = device.user_code.to_lowercase().replace('-', "");
        assert_eq!(
            store.lookup_user_code(&typed).await.unwrap().unwrap().device_code,
            device.device_code
        );
        assert!(store.approve_device(&typed, "alice", now, now).await.unwrap());
        assert!(!store.deny_device(&device.user_code, now).await.unwrap());

        let later = now + Duration::seconds(10);
        let DevicePoll::Approved(approved) =
            store.poll_device(&device.device_code, "tv", later).await.unwrap()
        else {
            panic!("expected approval");
        };
        assert_eq!(approved.subject_id.as_deref(), Some("alice"));
        assert_eq!(
            store
                .poll_device(&device.device_code, "tv", later + Duration::seconds(10))
                .await
                .unwrap(),
            DevicePoll::AlreadyConsumed
        );
    }

    #[tokio::test]
    async fn test_device_denial_and_expiry() {
        let (store, _) = store().await;
        let now = Utc::now();
        let denied = store
            .create_device("tv", ScopeSet::default(), now)
            .await
            .unwrap();
        assert!(store.deny_device(&denied.user_code, now).await.unwrap());
        assert_eq!(
            store.poll_device(&denied.device_code, "tv", now).await.unwrap(),
            DevicePoll::Denied
        );

        let stale = store
            .create_device("tv", ScopeSet::default(), now)
            .await
            .unwrap();
        let after = stale.expires_at + Duration::seconds(1);
        assert_eq!(
            store.poll_device(&stale.device_code, "tv", after).await.unwrap(),
            DevicePoll::Expired
        );
        assert!(!store.approve_device(&stale.user_code, "alice", after, after).await.unwrap());
        assert!(!store.approve_device("not a code", "alice", now, now).await.unwrap());
    }
}
