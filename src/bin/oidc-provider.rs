// ABOUTME: OpenID Connect provider binary: serves the HTTP endpoints or runs one sweep pass
// ABOUTME: Loads configuration from the environment, seeds clients and users, then starts the server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
//!
//! Usage:
//! ```bash
//! # Serve (default), seeding from OIDC_SEED_FILE when set
//! oidc-provider
//!
//! # Serve with an explicit seed file and port
//! oidc-provider serve --seed ./seed.yaml --http-port 8443
//!
//! # Prune expired codes, tokens, and retired keys once, then exit
//! oidc-provider sweep
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use oidc_provider::config::{DatabaseUrl, ServerConfig};
use oidc_provider::logging;
use oidc_provider::oauth2_server::sweeper::sweep_once;
use oidc_provider::seed::{apply_seed, SeedFile};
use oidc_provider::server::{self, ServerContext};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "oidc-provider",
    about = "OpenID Connect authorization and token server",
    long_about = "Authorization code with PKCE, device authorization, refresh token rotation, and resource owner password grants."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Seed file override (YAML with `clients` and `users`)
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    /// Database URL override
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[non_exhaustive]
#[derive(Subcommand)]
enum Command {
    /// Serve the provider endpoints (default)
    Serve {
        /// Override HTTP port
        #[arg(long)]
        http_port: Option<u16>,
    },

    /// Run one sweep pass and exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(seed) = cli.seed {
        config.seed_file = Some(seed);
    }
    if let Some(database_url) = cli.database_url.as_deref() {
        config.database.url = DatabaseUrl::parse_url(database_url);
    }
    if let Some(Command::Serve {
        http_port: Some(port),
    }) = &cli.command
    {
        config.http.port = *port;
    }
    config.validate()?;

    logging::init_from_env()?;
    info!("{}", config.summary());

    let seed_file = config.seed_file.clone();
    let context = Arc::new(ServerContext::initialize(config).await?);

    if let Some(path) = seed_file {
        let seed = SeedFile::load(&path).await?;
        apply_seed(
            seed,
            context.flows().clients(),
            context.users(),
            Utc::now(),
        )
        .await?;
    }

    match cli.command {
        Some(Command::Sweep) => {
            let report = sweep_once(&context.sweeper()).await?;
            info!(removed = report.removed(), "Sweep pass complete");
            Ok(())
        }
        Some(Command::Serve { .. }) | None => server::serve(context).await,
    }
}
