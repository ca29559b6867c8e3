// ABOUTME: Resource owner authentication behind the IdentityProvider trait
// ABOUTME: Database-backed implementation with Argon2id password hashes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::crypto::SecretHasher;
use crate::database_plugins::SharedDatabase;
use crate::errors::{AppError, AppResult};
use crate::logging::AppLogger;
use crate::models::{Subject, UserRecord};

/// Source of resource owner identities
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check credentials; `None` when they do not match a user
    async fn authenticate(&self, username: &str, password: &str) -> AppResult<Option<Subject>>;

    /// Load the claims of a known subject
    async fn find_subject(&self, subject_id: &str) -> AppResult<Option<Subject>>;
}

/// User to create
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    /// Fixed subject id; a UUID is assigned when absent
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Login name
    pub username: String,
    /// Plaintext password, hashed before storage
    pub password: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the email is verified
    #[serde(default)]
    pub email_verified: bool,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Given name
    #[serde(default)]
    pub given_name: Option<String>,
    /// Family name
    #[serde(default)]
    pub family_name: Option<String>,
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Users stored in the provider database
#[derive(Clone)]
pub struct DatabaseIdentityProvider {
    database: SharedDatabase,
    hasher: SecretHasher,
}

impl DatabaseIdentityProvider {
    /// Creates a new database identity provider
    #[must_use]
    pub const fn new(database: SharedDatabase, hasher: SecretHasher) -> Self {
        Self { database, hasher }
    }

    /// Create a user; returns `false` if the username already exists
    ///
    /// # Errors
    ///
    /// Returns an error if hashing or storage fails
    pub async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> AppResult<bool> {
        if user.username.trim().is_empty() || user.password.is_empty() {
            return Err(AppError::invalid_input("username and password are required"));
        }
        if self
            .database
            .get_user_by_username(&user.username)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let password_hash = self.hasher.hash(&user.password).await?;
        let record = UserRecord {
            subject_id: user
                .subject_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            password_hash,
            username: user.username,
            email: user.email,
            email_verified: user.email_verified,
            name: user.name,
            given_name: user.given_name,
            family_name: user.family_name,
            roles: user.roles,
            created_at: now,
        };
        self.database.create_user(&record).await?;
        info!(subject_id = %record.subject_id, username = %record.username, "Created user");
        Ok(true)
    }
}

#[async_trait]
impl IdentityProvider for DatabaseIdentityProvider {
    async fn authenticate(&self, username: &str, password: &str) -> AppResult<Option<Subject>> {
        let Some(user) = self.database.get_user_by_username(username).await? else {
            self.hasher.verify_absent(password).await;
            AppLogger::log_auth_event(username, false, Some("unknown user"));
            return Ok(None);
        };
        if !self.hasher.verify(password, &user.password_hash).await {
            AppLogger::log_auth_event(username, false, Some("wrong password"));
            return Ok(None);
        }
        AppLogger::log_auth_event(username, true, None);
        Ok(Some(Subject::from(user)))
    }

    async fn find_subject(&self, subject_id: &str) -> AppResult<Option<Subject>> {
        Ok(self.database.get_user(subject_id).await?.map(Subject::from))
    }
}
