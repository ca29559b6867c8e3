// ABOUTME: Database abstraction layer for the identity provider
// ABOUTME: Storage trait for clients, users, grants, refresh tokens, revocations, and signing keys

//! # Database plugins
//!
//! Every component talks to persistence through [`DatabaseProvider`]. The
//! storage layer is the single source of truth for single-use codes and
//! refresh tokens, so each state transition that must happen at most once is
//! a single conditional statement (or one transaction) inside the backend.
//!
//! Timestamps are stored as unix seconds. Expiry is inclusive: a record with
//! `expires_at = t` is usable at `t` and expired at `t + 1`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AppResult;
use crate::models::{
    AuthorizationRequest, Client, ConsumeOutcome, DeviceAuthorization, DevicePoll, DeviceStatus,
    RefreshTokenRecord, StoredSigningKey, UserRecord,
};

/// Shared helpers (row mapping, transactions)
pub mod shared;
/// `SQLite` backend
pub mod sqlite;

pub use sqlite::SqliteDatabase;

/// Shared handle used by every component
pub type SharedDatabase = Arc<dyn DatabaseProvider>;

/// Core database abstraction trait
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Connect to the database at `database_url`
    async fn new(database_url: &str) -> AppResult<Self>
    where
        Self: Sized;

    /// Create tables and indices if missing
    async fn migrate(&self) -> AppResult<()>;

    // ================================
    // Clients
    // ================================

    /// Insert a client; fails with `ResourceAlreadyExists` on a duplicate id
    async fn create_client(&self, client: &Client) -> AppResult<()>;

    /// Get a client by id
    async fn get_client(&self, client_id: &str) -> AppResult<Option<Client>>;

    /// Replace a client's mutable fields; returns whether it existed
    async fn update_client(&self, client: &Client) -> AppResult<bool>;

    // ================================
    // Users
    // ================================

    /// Insert a user; fails with `ResourceAlreadyExists` on a duplicate username
    async fn create_user(&self, user: &UserRecord) -> AppResult<()>;

    /// Get a user by login name
    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<UserRecord>>;

    /// Get a user by subject id
    async fn get_user(&self, subject_id: &str) -> AppResult<Option<UserRecord>>;

    // ================================
    // Authorization codes
    // ================================

    /// Persist a new authorization code
    async fn store_authorization_request(&self, request: &AuthorizationRequest) -> AppResult<()>;

    /// Atomically mark a code consumed if it is unconsumed and `expires_at >= now`
    ///
    /// Under concurrent callers exactly one observes `Consumed`.
    async fn consume_authorization_request(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ConsumeOutcome<AuthorizationRequest>>;

    // ================================
    // Device authorizations
    // ================================

    /// Persist a new device authorization
    async fn store_device_authorization(&self, device: &DeviceAuthorization) -> AppResult<()>;

    /// Look up a device authorization by its normalized user code
    async fn get_device_authorization_by_user_code(
        &self,
        user_code: &str,
    ) -> AppResult<Option<DeviceAuthorization>>;

    /// Move a pending, unexpired authorization to `approved` or `denied`
    ///
    /// Returns `false` if it is unknown, expired, or already decided.
    async fn decide_device_authorization(
        &self,
        user_code: &str,
        decision: DeviceStatus,
        subject_id: Option<&str>,
        auth_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Record a poll by `client_id` and report the outcome
    ///
    /// Approved authorizations are consumed by exactly one poll. Polls closer
    /// together than the interval raise it by `slow_down_increment_secs`.
    async fn poll_device_authorization(
        &self,
        device_code: &str,
        client_id: &str,
        now: DateTime<Utc>,
        slow_down_increment_secs: i64,
    ) -> AppResult<DevicePoll>;

    // ================================
    // Refresh tokens
    // ================================

    /// Persist a refresh token record
    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> AppResult<()>;

    /// Get a refresh token record by `jti`
    async fn get_refresh_token(&self, token_id: &str) -> AppResult<Option<RefreshTokenRecord>>;

    /// Revoke `old_token_id` and insert `replacement` in one transaction
    ///
    /// Returns `false` (and writes nothing) if the old token was already
    /// revoked, expired at `now`, or unknown.
    async fn rotate_refresh_token(
        &self,
        old_token_id: &str,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Revoke one refresh token; returns whether it was active
    async fn revoke_refresh_token(&self, token_id: &str, now: DateTime<Utc>) -> AppResult<bool>;

    /// Revoke every refresh token descending from an authorization
    async fn revoke_authorization(
        &self,
        authorization_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;

    // ================================
    // Access token denylist
    // ================================

    /// Deny an access token until its own expiry
    async fn revoke_access_token(
        &self,
        token_id: &str,
        client_id: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Whether an access token `jti` was revoked
    async fn is_access_token_revoked(&self, token_id: &str) -> AppResult<bool>;

    // ================================
    // Signing keys
    // ================================

    /// Persist an encrypted signing key
    async fn store_signing_key(&self, key: &StoredSigningKey) -> AppResult<()>;

    /// All stored signing keys, oldest first
    async fn list_signing_keys(&self) -> AppResult<Vec<StoredSigningKey>>;

    /// Atomically store `replacement` and retire `previous_kid`
    ///
    /// Fails without changes if `previous_kid` is not the active key.
    async fn rotate_signing_key(
        &self,
        replacement: &StoredSigningKey,
        previous_kid: &str,
        retired_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Delete a key
    async fn delete_signing_key(&self, kid: &str) -> AppResult<()>;

    // ================================
    // Sweeping
    // ================================

    /// Delete codes with `expires_at < now`
    async fn delete_expired_authorization_requests(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Delete device authorizations with `expires_at < now`
    async fn delete_expired_device_authorizations(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Delete refresh tokens past expiry, or revoked before `revoked_before`
    async fn delete_stale_refresh_tokens(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Delete denylist entries whose token has expired
    async fn delete_expired_access_token_revocations(&self, now: DateTime<Utc>)
        -> AppResult<u64>;
}
