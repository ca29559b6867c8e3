// ABOUTME: Server assembly: shared context, layered HTTP router, and the serve loop
// ABOUTME: Wires storage, keys, registry, issuer, validator, and flows into one Arc'd context
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Server
//!
//! [`ServerContext`] owns every long-lived component. Handlers receive it as
//! `State<Arc<ServerContext>>`; the sweeper task shares the same key ring and
//! database handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::crypto::SecretHasher;
use crate::database_plugins::{DatabaseProvider, SharedDatabase, SqliteDatabase};
use crate::errors::AppResult;
use crate::key_management::MasterEncryptionKey;
use crate::middleware::{rate_limit, request_id_middleware, setup_cors};
use crate::oauth2_server::client_registration::ClientRegistry;
use crate::oauth2_server::flows::GrantFlowController;
use crate::oauth2_server::identity::DatabaseIdentityProvider;
use crate::oauth2_server::issuer::TokenIssuer;
use crate::oauth2_server::keys::KeyRing;
use crate::oauth2_server::rate_limiting::OAuth2RateLimiter;
use crate::oauth2_server::routes::OidcRoutes;
use crate::oauth2_server::sessions::AuthorizationSessionStore;
use crate::oauth2_server::sweeper::Sweeper;
use crate::oauth2_server::validator::TokenValidator;

/// Long-lived components shared by every request
pub struct ServerContext {
    config: Arc<ServerConfig>,
    database: SharedDatabase,
    keys: Arc<KeyRing>,
    users: Arc<DatabaseIdentityProvider>,
    flows: GrantFlowController,
    rate_limiter: OAuth2RateLimiter,
}

impl ServerContext {
    /// Connect storage, unseal or create signing keys, and build every component
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, the
    /// master key is malformed, or no signing key can be loaded
    pub async fn initialize(config: ServerConfig) -> anyhow::Result<Self> {
        let database = SqliteDatabase::new(&config.database.url.to_connection_string())
            .await
            .context("Failed to open database")?;
        database
            .migrate()
            .await
            .context("Failed to migrate database")?;
        let database: SharedDatabase = Arc::new(database);

        let master_key = MasterEncryptionKey::load_or_generate(
            config.master_encryption_key.as_deref(),
        )?;
        if config.master_encryption_key.is_none() && !config.database.url.is_memory() {
            warn!("No master encryption key configured; stored signing keys will be unreadable after restart");
        }

        Ok(Self::with_database(config, database, Arc::new(master_key)).await?)
    }

    /// Build the context on an already migrated database
    ///
    /// # Errors
    ///
    /// Returns an error if the signing keys cannot be loaded or created
    pub async fn with_database(
        config: ServerConfig,
        database: SharedDatabase,
        master_key: Arc<MasterEncryptionKey>,
    ) -> AppResult<Self> {
        let keys = Arc::new(
            KeyRing::load_or_create(database.clone(), master_key, config.keys.clone(), Utc::now())
                .await?,
        );
        let hasher = SecretHasher::default();
        let users = Arc::new(DatabaseIdentityProvider::new(
            database.clone(),
            hasher.clone(),
        ));

        let issuer = TokenIssuer::new(
            config.issuer().to_owned(),
            keys.clone(),
            database.clone(),
            config.lifetimes.clone(),
            config.resource_audiences.clone(),
        );
        let validator =
            TokenValidator::new(config.issuer().to_owned(), keys.clone(), database.clone());
        let flows = GrantFlowController::new(
            ClientRegistry::new(database.clone(), hasher),
            AuthorizationSessionStore::new(database.clone(), &config.lifetimes),
            issuer,
            validator,
            users.clone(),
            database.clone(),
        );
        let rate_limiter = OAuth2RateLimiter::new(config.rate_limit.clone());

        Ok(Self {
            config: Arc::new(config),
            database,
            keys,
            users,
            flows,
            rate_limiter,
        })
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Storage handle
    #[must_use]
    pub const fn database(&self) -> &SharedDatabase {
        &self.database
    }

    /// Signing key ring
    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Database-backed user store
    #[must_use]
    pub const fn users(&self) -> &Arc<DatabaseIdentityProvider> {
        &self.users
    }

    /// Grant flows and the components behind them
    #[must_use]
    pub const fn flows(&self) -> &GrantFlowController {
        &self.flows
    }

    /// Rate limiter for credential-bearing endpoints
    #[must_use]
    pub const fn rate_limiter(&self) -> &OAuth2RateLimiter {
        &self.rate_limiter
    }

    /// Sweeper over this context's storage and keys
    #[must_use]
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.flows.sessions().clone(),
            self.database.clone(),
            self.keys.clone(),
            self.config.sweeper.clone(),
        )
    }
}

/// Provider router with the HTTP middleware stack applied
pub fn build_router(context: Arc<ServerContext>) -> Router {
    let http = &context.config().http;
    let cors = setup_cors(http);
    // Newer tower-http releases prefer `with_status_code`; `new` answers 408 as well
    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(http.request_timeout_secs));
    let body_limit = RequestBodyLimitLayer::new(http.max_body_bytes);
    let limiter = context.rate_limiter().clone();

    OidcRoutes::routes(context)
        .layer(from_fn_with_state(limiter, rate_limit))
        .layer(body_limit)
        .layer(timeout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
}

/// Serve HTTP and run the sweeper until Ctrl-C
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails
pub async fn serve(context: Arc<ServerContext>) -> anyhow::Result<()> {
    let http = &context.config().http;
    let address = format!("{}:{}", http.host, http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = context.sweeper();
    let interval = Duration::from_secs(context.config().sweeper.interval_secs);
    let sweeper_task = tokio::spawn(async move { sweeper.run(interval, shutdown_rx).await });

    info!(address = %address, issuer = %context.config().issuer(), "OIDC provider listening");
    let router = build_router(context);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")?;

    info!("HTTP server stopped, waiting for the sweeper");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
        return;
    }
    info!("Shutdown signal received");
}
