// ABOUTME: Idempotent seeding of clients and users from a YAML file
// ABOUTME: Existing client ids and usernames are left untouched so startup can re-run it safely
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Seeding
//!
//! ```yaml
//! clients:
//!   - client_id: console
//!     client_type: public
//!     allowed_grant_types: [authorization_code, refresh_token]
//!     redirect_uris: ["http://127.0.0.1:5000/callback"]
//!     allowed_scopes: [openid, profile, offline_access]
//! users:
//!   - username: alice
//!     password: correct horse battery staple
//!     email: alice@example.com
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult, ClientError, ErrorCode};
use crate::oauth2_server::client_registration::{ClientRegistration, ClientRegistry};
use crate::oauth2_server::identity::{DatabaseIdentityProvider, NewUser};

/// Contents of a seed file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    /// Clients to register
    #[serde(default)]
    pub clients: Vec<ClientRegistration>,
    /// Users to create
    #[serde(default)]
    pub users: Vec<NewUser>,
}

impl SeedFile {
    /// Parse seed YAML
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a client has no fixed id
    pub fn parse(yaml: &str) -> AppResult<Self> {
        let seed: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AppError::invalid_input(format!("Invalid seed file: {e}")))?;
        if seed.clients.iter().any(|client| client.client_id.is_none()) {
            return Err(AppError::invalid_input(
                "Seeded clients need a client_id so re-seeding can recognise them",
            ));
        }
        Ok(seed)
    }

    /// Read and parse a seed file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub async fn load(path: &Path) -> AppResult<Self> {
        let yaml = fs::read_to_string(path).await.map_err(|e| {
            AppError::new(
                ErrorCode::ConfigError,
                format!("Failed to read seed file {}: {e}", path.display()),
            )
        })?;
        Self::parse(&yaml)
    }
}

/// What a seeding run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Clients registered
    pub clients_created: usize,
    /// Clients that already existed
    pub clients_skipped: usize,
    /// Users created
    pub users_created: usize,
    /// Users that already existed
    pub users_skipped: usize,
}

/// Register missing clients and create missing users
///
/// # Errors
///
/// Returns an error if a registration is invalid or storage fails
pub async fn apply_seed(
    seed: SeedFile,
    clients: &ClientRegistry,
    users: &DatabaseIdentityProvider,
    now: DateTime<Utc>,
) -> AppResult<SeedReport> {
    let mut report = SeedReport::default();

    for registration in seed.clients {
        let client_id = registration.client_id.clone().unwrap_or_default();
        match clients.lookup(&client_id).await {
            Ok(_) => {
                report.clients_skipped += 1;
                continue;
            }
            Err(ClientError::NotFound { .. }) => {}
            Err(e) => return Err(seed_error(&client_id, e)),
        }
        match clients.register(registration, now).await {
            Ok(registered) => {
                report.clients_created += 1;
                if registered.client_secret.is_some() {
                    warn!(
                        client_id = %client_id,
                        "Seeded confidential client; its secret is only kept as a hash"
                    );
                }
            }
            Err(ClientError::AlreadyRegistered { .. }) => report.clients_skipped += 1,
            Err(e) => return Err(seed_error(&client_id, e)),
        }
    }

    for user in seed.users {
        if users.create_user(user, now).await? {
            report.users_created += 1;
        } else {
            report.users_skipped += 1;
        }
    }

    info!(
        clients_created = report.clients_created,
        clients_skipped = report.clients_skipped,
        users_created = report.users_created,
        users_skipped = report.users_skipped,
        "Seeding finished"
    );
    Ok(report)
}

fn seed_error(client_id: &str, error: ClientError) -> AppError {
    match error {
        ClientError::Storage(e) => e,
        other => AppError::invalid_input(format!("Seed client '{client_id}': {other}")),
    }
}
