// ABOUTME: SQLite implementation of the storage trait
// ABOUTME: Schema migration plus atomic single-use transitions via conditional UPDATE ... RETURNING
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! `SQLite` database implementation
//!
//! In-memory databases are limited to one pooled connection, otherwise each
//! connection would see its own empty database.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Error as SqlxError, Row, SqlitePool};
use tracing::{debug, info};

use super::shared::mappers::{
    parse_authorization_request_from_row, parse_client_from_row,
    parse_device_authorization_from_row, parse_refresh_token_from_row,
    parse_signing_key_from_row, parse_user_from_row, to_json, to_timestamp,
};
use super::shared::transactions::SqliteTransactionGuard;
use super::DatabaseProvider;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::{
    AuthorizationRequest, Client, ConsumeOutcome, DeviceAuthorization, DevicePoll, DeviceStatus,
    RefreshTokenRecord, StoredSigningKey, UserRecord,
};

const AUTHORIZATION_REQUEST_COLUMNS: &str = "code, authorization_id, client_id, subject_id, \
     scopes, redirect_uri, code_challenge, code_challenge_method, nonce, auth_time, created_at, \
     expires_at, consumed";

const DEVICE_AUTHORIZATION_COLUMNS: &str = "device_code, user_code, authorization_id, \
     client_id, scopes, status, subject_id, auth_time, created_at, expires_at, \
     poll_interval_secs, last_polled_at, consumed, throttled";

/// `SQLite` database implementation
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Map a unique-constraint violation to `ResourceAlreadyExists`
    fn insert_error(error: SqlxError, resource: &str) -> AppError {
        if let SqlxError::Database(db) = &error {
            if db.is_unique_violation() {
                return AppError::already_exists(resource.to_owned());
            }
        }
        AppError::from(error)
    }

    async fn migrate_clients(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth_clients (
                client_id TEXT PRIMARY KEY,
                client_type TEXT NOT NULL CHECK (client_type IN ('public', 'confidential')),
                secret_hash TEXT,
                display_name TEXT,
                allowed_grant_types TEXT NOT NULL,
                redirect_uris TEXT NOT NULL,
                post_logout_redirect_uris TEXT NOT NULL,
                allowed_scopes TEXT NOT NULL,
                requires_pkce INTEGER NOT NULL DEFAULT 1,
                consent_type TEXT NOT NULL DEFAULT 'implicit',
                access_token_lifetime_secs INTEGER,
                requires_encryption INTEGER NOT NULL DEFAULT 0,
                encryption_key TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn migrate_users(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                subject_id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                email TEXT,
                email_verified INTEGER NOT NULL DEFAULT 0,
                name TEXT,
                given_name TEXT,
                family_name TEXT,
                roles TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn migrate_grants(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS authorization_requests (
                code TEXT PRIMARY KEY,
                authorization_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                scopes TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                code_challenge TEXT,
                code_challenge_method TEXT,
                nonce TEXT,
                auth_time INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_authorization_requests_expires ON authorization_requests(expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS device_authorizations (
                device_code TEXT PRIMARY KEY,
                user_code TEXT NOT NULL UNIQUE,
                authorization_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                scopes TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'denied', 'expired')),
                subject_id TEXT,
                auth_time INTEGER,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                poll_interval_secs INTEGER NOT NULL,
                last_polled_at INTEGER,
                consumed INTEGER NOT NULL DEFAULT 0,
                throttled INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_device_authorizations_expires ON device_authorizations(expires_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn migrate_tokens(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                token_id TEXT PRIMARY KEY,
                authorization_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                scopes TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                auth_time INTEGER,
                revoked INTEGER NOT NULL DEFAULT 0,
                revoked_at INTEGER
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_authorization ON refresh_tokens(authorization_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires ON refresh_tokens(expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS revoked_access_tokens (
                token_id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS signing_keys (
                kid TEXT PRIMARY KEY,
                algorithm TEXT NOT NULL,
                encrypted_private_key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retired_at INTEGER
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DatabaseProvider for SqliteDatabase {
    async fn new(database_url: &str) -> AppResult<Self> {
        let memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid DATABASE_URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let options = if memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if memory { 1 } else { 8 })
            // An in-memory database lives exactly as long as its connection
            .idle_timeout(if memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        info!(memory = memory, "Connected to SQLite database");
        Ok(Self { pool })
    }

    async fn migrate(&self) -> AppResult<()> {
        self.migrate_clients().await?;
        self.migrate_users().await?;
        self.migrate_grants().await?;
        self.migrate_tokens().await?;
        debug!("Database schema is up to date");
        Ok(())
    }

    // ================================
    // Clients
    // ================================

    async fn create_client(&self, client: &Client) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth_clients (
                client_id, client_type, secret_hash, display_name, allowed_grant_types,
                redirect_uris, post_logout_redirect_uris, allowed_scopes, requires_pkce,
                consent_type, access_token_lifetime_secs, requires_encryption, encryption_key,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(&client.client_id)
        .bind(client.client_type.as_str())
        .bind(&client.secret_hash)
        .bind(&client.display_name)
        .bind(to_json(&client.allowed_grant_types)?)
        .bind(to_json(&client.redirect_uris)?)
        .bind(to_json(&client.post_logout_redirect_uris)?)
        .bind(client.allowed_scopes.to_string())
        .bind(client.requires_pkce)
        .bind(client.consent_type.as_str())
        .bind(client.access_token_lifetime_secs)
        .bind(client.requires_encryption)
        .bind(&client.encryption_key)
        .bind(to_timestamp(client.created_at))
        .bind(to_timestamp(client.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::insert_error(e, &format!("Client {}", client.client_id)))?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> AppResult<Option<Client>> {
        sqlx::query("SELECT * FROM oauth_clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| parse_client_from_row(&row))
            .transpose()
    }

    async fn update_client(&self, client: &Client) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE oauth_clients SET
                client_type = $2, secret_hash = $3, display_name = $4,
                allowed_grant_types = $5, redirect_uris = $6, post_logout_redirect_uris = $7,
                allowed_scopes = $8, requires_pkce = $9, consent_type = $10,
                access_token_lifetime_secs = $11, requires_encryption = $12,
                encryption_key = $13, updated_at = $14
            WHERE client_id = $1
            ",
        )
        .bind(&client.client_id)
        .bind(client.client_type.as_str())
        .bind(&client.secret_hash)
        .bind(&client.display_name)
        .bind(to_json(&client.allowed_grant_types)?)
        .bind(to_json(&client.redirect_uris)?)
        .bind(to_json(&client.post_logout_redirect_uris)?)
        .bind(client.allowed_scopes.to_string())
        .bind(client.requires_pkce)
        .bind(client.consent_type.as_str())
        .bind(client.access_token_lifetime_secs)
        .bind(client.requires_encryption)
        .bind(&client.encryption_key)
        .bind(to_timestamp(client.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ================================
    // Users
    // ================================

    async fn create_user(&self, user: &UserRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO users (
                subject_id, username, password_hash, email, email_verified,
                name, given_name, family_name, roles, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&user.subject_id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.name)
        .bind(&user.given_name)
        .bind(&user.family_name)
        .bind(to_json(&user.roles)?)
        .bind(to_timestamp(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::insert_error(e, &format!("User {}", user.username)))?;
        Ok(())
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<UserRecord>> {
        sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| parse_user_from_row(&row))
            .transpose()
    }

    async fn get_user(&self, subject_id: &str) -> AppResult<Option<UserRecord>> {
        sqlx::query("SELECT * FROM users WHERE subject_id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| parse_user_from_row(&row))
            .transpose()
    }

    // ================================
    // Authorization codes
    // ================================

    async fn store_authorization_request(&self, request: &AuthorizationRequest) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO authorization_requests (
                code, authorization_id, client_id, subject_id, scopes, redirect_uri,
                code_challenge, code_challenge_method, nonce, auth_time, created_at,
                expires_at, consumed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(&request.code)
        .bind(&request.authorization_id)
        .bind(&request.client_id)
        .bind(&request.subject_id)
        .bind(request.requested_scopes.to_string())
        .bind(&request.redirect_uri)
        .bind(&request.code_challenge)
        .bind(&request.code_challenge_method)
        .bind(&request.nonce)
        .bind(to_timestamp(request.auth_time))
        .bind(to_timestamp(request.created_at))
        .bind(to_timestamp(request.expires_at))
        .bind(request.consumed)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::insert_error(e, "Authorization code"))?;
        Ok(())
    }

    async fn consume_authorization_request(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ConsumeOutcome<AuthorizationRequest>> {
        let consumed = sqlx::query(&format!(
            "UPDATE authorization_requests SET consumed = 1 \
             WHERE code = $1 AND consumed = 0 AND expires_at >= $2 \
             RETURNING {AUTHORIZATION_REQUEST_COLUMNS}"
        ))
        .bind(code)
        .bind(to_timestamp(now))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = consumed {
            return Ok(ConsumeOutcome::Consumed(
                parse_authorization_request_from_row(&row)?,
            ));
        }

        // Lost the race, already used, expired, or unknown
        let existing = sqlx::query(&format!(
            "SELECT {AUTHORIZATION_REQUEST_COLUMNS} FROM authorization_requests WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| parse_authorization_request_from_row(&row))
        .transpose()?;

        Ok(match existing {
            None => ConsumeOutcome::NotFound,
            Some(request) if request.consumed => ConsumeOutcome::AlreadyConsumed(request),
            Some(_) => ConsumeOutcome::Expired,
        })
    }

    // ================================
    // Device authorizations
    // ================================

    async fn store_device_authorization(&self, device: &DeviceAuthorization) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO device_authorizations (
                device_code, user_code, authorization_id, client_id, scopes, status,
                subject_id, auth_time, created_at, expires_at, poll_interval_secs,
                last_polled_at, consumed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(&device.device_code)
        .bind(&device.user_code)
        .bind(&device.authorization_id)
        .bind(&device.client_id)
        .bind(device.scopes.to_string())
        .bind(device.status.as_str())
        .bind(&device.subject_id)
        .bind(device.auth_time.map(to_timestamp))
        .bind(to_timestamp(device.created_at))
        .bind(to_timestamp(device.expires_at))
        .bind(device.poll_interval_secs)
        .bind(device.last_polled_at.map(to_timestamp))
        .bind(device.consumed)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::insert_error(e, "Device code"))?;
        Ok(())
    }

    async fn get_device_authorization_by_user_code(
        &self,
        user_code: &str,
    ) -> AppResult<Option<DeviceAuthorization>> {
        sqlx::query(&format!(
            "SELECT {DEVICE_AUTHORIZATION_COLUMNS} FROM device_authorizations WHERE user_code = $1"
        ))
        .bind(user_code)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| parse_device_authorization_from_row(&row))
        .transpose()
    }

    async fn decide_device_authorization(
        &self,
        user_code: &str,
        decision: DeviceStatus,
        subject_id: Option<&str>,
        auth_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        if !matches!(decision, DeviceStatus::Approved | DeviceStatus::Denied) {
            return Err(AppError::invalid_input(format!(
                "Device authorizations cannot be moved to '{}' by a user",
                decision.as_str()
            )));
        }

        let result = sqlx::query(
            r"
            UPDATE device_authorizations
            SET status = $2, subject_id = $3, auth_time = $4
            WHERE user_code = $1 AND status = 'pending' AND expires_at >= $5
            ",
        )
        .bind(user_code)
        .bind(decision.as_str())
        .bind(subject_id)
        .bind(auth_time.map(to_timestamp))
        .bind(to_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn poll_device_authorization(
        &self,
        device_code: &str,
        client_id: &str,
        now: DateTime<Utc>,
        slow_down_increment_secs: i64,
    ) -> AppResult<DevicePoll> {
        let now_ts = to_timestamp(now);

        // Hand out an approved grant to exactly one poll
        let approved = sqlx::query(&format!(
            "UPDATE device_authorizations SET consumed = 1, last_polled_at = $3, throttled = 0 \
             WHERE device_code = $1 AND client_id = $2 AND status = 'approved' \
               AND consumed = 0 AND expires_at >= $3 \
             RETURNING {DEVICE_AUTHORIZATION_COLUMNS}"
        ))
        .bind(device_code)
        .bind(client_id)
        .bind(now_ts)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = approved {
            return Ok(DevicePoll::Approved(parse_device_authorization_from_row(
                &row,
            )?));
        }

        // SET expressions read the pre-update row, so every CASE sees the old state
        let row = sqlx::query(&format!(
            "UPDATE device_authorizations SET \
               status = CASE WHEN status = 'pending' AND expires_at < $3 \
                             THEN 'expired' ELSE status END, \
               throttled = CASE WHEN status = 'pending' AND expires_at >= $3 \
                                 AND last_polled_at IS NOT NULL \
                                 AND $3 - last_polled_at < poll_interval_secs \
                             THEN 1 ELSE 0 END, \
               poll_interval_secs = CASE WHEN status = 'pending' AND expires_at >= $3 \
                                 AND last_polled_at IS NOT NULL \
                                 AND $3 - last_polled_at < poll_interval_secs \
                             THEN poll_interval_secs + $4 ELSE poll_interval_secs END, \
               last_polled_at = $3 \
             WHERE device_code = $1 AND client_id = $2 \
             RETURNING {DEVICE_AUTHORIZATION_COLUMNS}"
        ))
        .bind(device_code)
        .bind(client_id)
        .bind(now_ts)
        .bind(slow_down_increment_secs)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(DevicePoll::NotFound);
        };
        let throttled: bool = row.try_get("throttled")?;
        let device = parse_device_authorization_from_row(&row)?;

        Ok(match device.status {
            DeviceStatus::Expired => DevicePoll::Expired,
            DeviceStatus::Denied => DevicePoll::Denied,
            DeviceStatus::Approved if device.consumed => DevicePoll::AlreadyConsumed,
            DeviceStatus::Approved if device.expires_at < now => DevicePoll::Expired,
            // Approved between the two statements; the next poll collects it
            DeviceStatus::Approved => DevicePoll::Pending,
            DeviceStatus::Pending if throttled => DevicePoll::SlowDown,
            DeviceStatus::Pending => DevicePoll::Pending,
        })
    }

    // ================================
    // Refresh tokens
    // ================================

    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO refresh_tokens (
                token_id, authorization_id, client_id, subject_id, scopes,
                issued_at, expires_at, auth_time, revoked, revoked_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&record.token_id)
        .bind(&record.authorization_id)
        .bind(&record.client_id)
        .bind(&record.subject_id)
        .bind(record.scopes.to_string())
        .bind(to_timestamp(record.issued_at))
        .bind(to_timestamp(record.expires_at))
        .bind(record.auth_time.map(to_timestamp))
        .bind(record.revoked)
        .bind(record.revoked_at.map(to_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::insert_error(e, "Refresh token"))?;
        Ok(())
    }

    async fn get_refresh_token(&self, token_id: &str) -> AppResult<Option<RefreshTokenRecord>> {
        sqlx::query("SELECT * FROM refresh_tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| parse_refresh_token_from_row(&row))
            .transpose()
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: &str,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut guard = SqliteTransactionGuard::new(self.pool.begin().await?);

        let revoked = sqlx::query(
            r"
            UPDATE refresh_tokens SET revoked = 1, revoked_at = $2
            WHERE token_id = $1 AND revoked = 0 AND expires_at >= $2
            ",
        )
        .bind(old_token_id)
        .bind(to_timestamp(now))
        .execute(guard.executor()?)
        .await?;

        if revoked.rows_affected() != 1 {
            // Lost the race or the token is spent; nothing was written
            guard.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r"
            INSERT INTO refresh_tokens (
                token_id, authorization_id, client_id, subject_id, scopes,
                issued_at, expires_at, auth_time, revoked, revoked_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, NULL)
            ",
        )
        .bind(&replacement.token_id)
        .bind(&replacement.authorization_id)
        .bind(&replacement.client_id)
        .bind(&replacement.subject_id)
        .bind(replacement.scopes.to_string())
        .bind(to_timestamp(replacement.issued_at))
        .bind(to_timestamp(replacement.expires_at))
        .bind(replacement.auth_time.map(to_timestamp))
        .execute(guard.executor()?)
        .await?;

        guard.commit().await?;
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_id: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = $2 WHERE token_id = $1 AND revoked = 0",
        )
        .bind(token_id)
        .bind(to_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_authorization(
        &self,
        authorization_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = $2 WHERE authorization_id = $1 AND revoked = 0",
        )
        .bind(authorization_id)
        .bind(to_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ================================
    // Access token denylist
    // ================================

    async fn revoke_access_token(
        &self,
        token_id: &str,
        client_id: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO revoked_access_tokens (token_id, client_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_id) DO NOTHING
            ",
        )
        .bind(token_id)
        .bind(client_id)
        .bind(to_timestamp(expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_access_token_revoked(&self, token_id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM revoked_access_tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // ================================
    // Signing keys
    // ================================

    async fn store_signing_key(&self, key: &StoredSigningKey) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO signing_keys (kid, algorithm, encrypted_private_key, created_at, retired_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&key.kid)
        .bind(&key.algorithm)
        .bind(&key.encrypted_private_key)
        .bind(to_timestamp(key.created_at))
        .bind(key.retired_at.map(to_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::insert_error(e, &format!("Signing key {}", key.kid)))?;
        Ok(())
    }

    async fn list_signing_keys(&self) -> AppResult<Vec<StoredSigningKey>> {
        sqlx::query("SELECT * FROM signing_keys ORDER BY created_at ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(parse_signing_key_from_row)
            .collect()
    }

    async fn rotate_signing_key(
        &self,
        replacement: &StoredSigningKey,
        previous_kid: &str,
        retired_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut guard = SqliteTransactionGuard::new(self.pool.begin().await?);

        let retired = sqlx::query(
            "UPDATE signing_keys SET retired_at = $2 WHERE kid = $1 AND retired_at IS NULL",
        )
        .bind(previous_kid)
        .bind(to_timestamp(retired_at))
        .execute(guard.executor()?)
        .await?;
        if retired.rows_affected() != 1 {
            guard.rollback().await?;
            return Err(AppError::new(
                ErrorCode::ResourceNotFound,
                format!("Signing key {previous_kid} is no longer the active key"),
            ));
        }

        sqlx::query(
            r"
            INSERT INTO signing_keys (kid, algorithm, encrypted_private_key, created_at, retired_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&replacement.kid)
        .bind(&replacement.algorithm)
        .bind(&replacement.encrypted_private_key)
        .bind(to_timestamp(replacement.created_at))
        .bind(replacement.retired_at.map(to_timestamp))
        .execute(guard.executor()?)
        .await
        .map_err(|e| Self::insert_error(e, &format!("Signing key {}", replacement.kid)))?;

        guard.commit().await
    }

    async fn delete_signing_key(&self, kid: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM signing_keys WHERE kid = $1")
            .bind(kid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::new(
                ErrorCode::ResourceNotFound,
                format!("Signing key {kid} not found"),
            ));
        }
        Ok(())
    }

    // ================================
    // Sweeping
    // ================================

    async fn delete_expired_authorization_requests(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM authorization_requests WHERE expires_at < $1")
            .bind(to_timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_device_authorizations(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM device_authorizations WHERE expires_at < $1")
            .bind(to_timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_stale_refresh_tokens(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM refresh_tokens
            WHERE expires_at < $1 OR (revoked = 1 AND revoked_at < $2)
            ",
        )
        .bind(to_timestamp(now))
        .bind(to_timestamp(revoked_before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_access_token_revocations(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_access_tokens WHERE expires_at < $1")
            .bind(to_timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
