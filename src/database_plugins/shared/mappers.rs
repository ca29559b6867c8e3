// ABOUTME: Model to SQL row conversion helpers for database operations
// ABOUTME: Converts timestamps, sets, and rows into domain models

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Model ↔ SQL row conversion helpers

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::{AppError, AppResult};
use crate::models::{
    AuthorizationRequest, Client, ClientType, ConsentType, DeviceAuthorization, DeviceStatus,
    GrantType, RefreshTokenRecord, ScopeSet, StoredSigningKey, UserRecord,
};

/// Unix seconds for storage
#[must_use]
pub fn to_timestamp(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Unix seconds from storage
///
/// # Errors
///
/// Returns an error if the value is out of range
pub fn from_timestamp(secs: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AppError::database(format!("Timestamp out of range: {secs}")))
}

fn optional_timestamp(secs: Option<i64>) -> AppResult<Option<DateTime<Utc>>> {
    secs.map(from_timestamp).transpose()
}

/// JSON column encoding
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn to_json<T: Serialize>(value: &T) -> AppResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(column: &str, value: &str) -> AppResult<T> {
    serde_json::from_str(value)
        .map_err(|e| AppError::database(format!("Corrupt JSON in column '{column}': {e}")))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> AppResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| AppError::database(format!("Failed to get column '{column}': {e}")))
}

/// Parse a client row
///
/// # Errors
///
/// Returns an error if a column is missing or holds an unknown value
pub fn parse_client_from_row(row: &SqliteRow) -> AppResult<Client> {
    let client_type: String = get(row, "client_type")?;
    let consent_type: String = get(row, "consent_type")?;
    let grant_types: String = get(row, "allowed_grant_types")?;
    let redirect_uris: String = get(row, "redirect_uris")?;
    let logout_uris: String = get(row, "post_logout_redirect_uris")?;
    let scopes: String = get(row, "allowed_scopes")?;

    Ok(Client {
        client_id: get(row, "client_id")?,
        client_type: ClientType::parse(&client_type)
            .ok_or_else(|| AppError::database(format!("Unknown client type: {client_type}")))?,
        secret_hash: get(row, "secret_hash")?,
        display_name: get(row, "display_name")?,
        allowed_grant_types: from_json::<BTreeSet<GrantType>>("allowed_grant_types", &grant_types)?,
        redirect_uris: from_json("redirect_uris", &redirect_uris)?,
        post_logout_redirect_uris: from_json("post_logout_redirect_uris", &logout_uris)?,
        allowed_scopes: ScopeSet::parse(&scopes),
        requires_pkce: get(row, "requires_pkce")?,
        consent_type: ConsentType::parse(&consent_type)
            .ok_or_else(|| AppError::database(format!("Unknown consent type: {consent_type}")))?,
        access_token_lifetime_secs: get(row, "access_token_lifetime_secs")?,
        requires_encryption: get(row, "requires_encryption")?,
        encryption_key: get(row, "encryption_key")?,
        created_at: from_timestamp(get(row, "created_at")?)?,
        updated_at: from_timestamp(get(row, "updated_at")?)?,
    })
}

/// Parse a user row
///
/// # Errors
///
/// Returns an error if a column is missing or corrupt
pub fn parse_user_from_row(row: &SqliteRow) -> AppResult<UserRecord> {
    let roles: String = get(row, "roles")?;
    Ok(UserRecord {
        subject_id: get(row, "subject_id")?,
        username: get(row, "username")?,
        password_hash: get(row, "password_hash")?,
        email: get(row, "email")?,
        email_verified: get(row, "email_verified")?,
        name: get(row, "name")?,
        given_name: get(row, "given_name")?,
        family_name: get(row, "family_name")?,
        roles: from_json("roles", &roles)?,
        created_at: from_timestamp(get(row, "created_at")?)?,
    })
}

/// Parse an authorization code row
///
/// # Errors
///
/// Returns an error if a column is missing or corrupt
pub fn parse_authorization_request_from_row(row: &SqliteRow) -> AppResult<AuthorizationRequest> {
    let scopes: String = get(row, "scopes")?;
    Ok(AuthorizationRequest {
        code: get(row, "code")?,
        authorization_id: get(row, "authorization_id")?,
        client_id: get(row, "client_id")?,
        subject_id: get(row, "subject_id")?,
        requested_scopes: ScopeSet::parse(&scopes),
        redirect_uri: get(row, "redirect_uri")?,
        code_challenge: get(row, "code_challenge")?,
        code_challenge_method: get(row, "code_challenge_method")?,
        nonce: get(row, "nonce")?,
        auth_time: from_timestamp(get(row, "auth_time")?)?,
        created_at: from_timestamp(get(row, "created_at")?)?,
        expires_at: from_timestamp(get(row, "expires_at")?)?,
        consumed: get(row, "consumed")?,
    })
}

/// Parse a device authorization row
///
/// # Errors
///
/// Returns an error if a column is missing or holds an unknown status
pub fn parse_device_authorization_from_row(row: &SqliteRow) -> AppResult<DeviceAuthorization> {
    let scopes: String = get(row, "scopes")?;
    let status: String = get(row, "status")?;
    Ok(DeviceAuthorization {
        device_code: get(row, "device_code")?,
        user_code: get(row, "user_code")?,
        authorization_id: get(row, "authorization_id")?,
        client_id: get(row, "client_id")?,
        scopes: ScopeSet::parse(&scopes),
        status: DeviceStatus::parse(&status)
            .ok_or_else(|| AppError::database(format!("Unknown device status: {status}")))?,
        subject_id: get(row, "subject_id")?,
        auth_time: optional_timestamp(get(row, "auth_time")?)?,
        created_at: from_timestamp(get(row, "created_at")?)?,
        expires_at: from_timestamp(get(row, "expires_at")?)?,
        poll_interval_secs: get(row, "poll_interval_secs")?,
        last_polled_at: optional_timestamp(get(row, "last_polled_at")?)?,
        consumed: get(row, "consumed")?,
    })
}

/// Parse a refresh token row
///
/// # Errors
///
/// Returns an error if a column is missing or corrupt
pub fn parse_refresh_token_from_row(row: &SqliteRow) -> AppResult<RefreshTokenRecord> {
    let scopes: String = get(row, "scopes")?;
    Ok(RefreshTokenRecord {
        token_id: get(row, "token_id")?,
        authorization_id: get(row, "authorization_id")?,
        client_id: get(row, "client_id")?,
        subject_id: get(row, "subject_id")?,
        scopes: ScopeSet::parse(&scopes),
        issued_at: from_timestamp(get(row, "issued_at")?)?,
        expires_at: from_timestamp(get(row, "expires_at")?)?,
        auth_time: optional_timestamp(get(row, "auth_time")?)?,
        revoked: get(row, "revoked")?,
        revoked_at: optional_timestamp(get(row, "revoked_at")?)?,
    })
}

/// Parse a signing key row
///
/// # Errors
///
/// Returns an error if a column is missing
pub fn parse_signing_key_from_row(row: &SqliteRow) -> AppResult<StoredSigningKey> {
    Ok(StoredSigningKey {
        kid: get(row, "kid")?,
        algorithm: get(row, "algorithm")?,
        encrypted_private_key: get(row, "encrypted_private_key")?,
        created_at: from_timestamp(get(row, "created_at")?)?,
        retired_at: optional_timestamp(get(row, "retired_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion_truncates_to_seconds() {
        let time = from_timestamp(1_700_000_000).unwrap();
        assert_eq!(to_timestamp(time), 1_700_000_000);
        assert!(from_timestamp(i64::MAX).is_err());
    }
}
