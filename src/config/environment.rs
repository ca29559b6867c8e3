// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Reads issuer, persistence, token lifetimes, key rotation, and HTTP settings from the environment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management for production deployment

use crate::constants::{lifetimes, scopes};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};
use url::{Host, Url};

/// Default issuer, matching the original deployment's HTTPS port
pub const DEFAULT_ISSUER: &str = "https://localhost:44395";
/// Default durable database
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./data/oidc.db";
/// Audience of the bundled resource API
pub const DATA_EVENT_RECORDS_AUDIENCE: &str = "rs_dataEventRecordsApi";

/// Type-safe database location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseUrl {
    /// `SQLite` database with file path
    SQLite {
        /// Database file
        path: PathBuf,
    },
    /// In-memory `SQLite` (tests only)
    Memory,
}

impl DatabaseUrl {
    /// Parse `sqlite:<path>` or `sqlite::memory:`; bare paths are treated as `SQLite` files
    #[must_use]
    pub fn parse_url(s: &str) -> Self {
        let path_str = s.strip_prefix("sqlite://").or_else(|| s.strip_prefix("sqlite:"));
        match path_str.unwrap_or(s) {
            ":memory:" => Self::Memory,
            path => Self::SQLite {
                path: PathBuf::from(path),
            },
        }
    }

    /// Connection string for sqlx
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            Self::SQLite { path } => format!("sqlite:{}", path.display()),
            Self::Memory => "sqlite::memory:".to_owned(),
        }
    }

    /// Check if this is an in-memory database
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::parse_url(DEFAULT_DATABASE_URL)
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_connection_string())
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Maximum request body
    pub max_body_bytes: usize,
    /// Allowed CORS origins, `*` for any
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 44395,
            request_timeout_secs: 30,
            max_body_bytes: 64 * 1024,
            cors_origins: vec!["*".into()],
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database location
    pub url: DatabaseUrl,
    /// Permit `sqlite::memory:` (tests)
    pub allow_in_memory: bool,
}

/// Lifetimes of every artifact the server mints, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLifetimes {
    /// Authorization codes
    pub authorization_code_secs: i64,
    /// Device and user codes
    pub device_code_secs: i64,
    /// Initial device polling interval
    pub device_poll_interval_secs: i64,
    /// Access tokens
    pub access_token_secs: i64,
    /// Identity tokens
    pub identity_token_secs: i64,
    /// Refresh tokens
    pub refresh_token_secs: i64,
    /// Login session cookie
    pub session_secs: i64,
    /// Per-scope access token lifetime caps
    pub scope_access_token_secs: BTreeMap<String, i64>,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            authorization_code_secs: lifetimes::AUTHORIZATION_CODE_SECS,
            device_code_secs: lifetimes::DEVICE_CODE_SECS,
            device_poll_interval_secs: lifetimes::DEVICE_POLL_INTERVAL_SECS,
            access_token_secs: lifetimes::ACCESS_TOKEN_SECS,
            identity_token_secs: lifetimes::IDENTITY_TOKEN_SECS,
            refresh_token_secs: lifetimes::REFRESH_TOKEN_SECS,
            session_secs: lifetimes::SESSION_SECS,
            scope_access_token_secs: BTreeMap::new(),
        }
    }
}

impl TokenLifetimes {
    /// Lifetimes of tokens signed with the current key
    fn signed_token_lifetimes(&self) -> impl Iterator<Item = (&str, i64)> {
        [
            ("ACCESS_TOKEN_LIFETIME_SECS", self.access_token_secs),
            ("IDENTITY_TOKEN_LIFETIME_SECS", self.identity_token_secs),
            ("REFRESH_TOKEN_LIFETIME_SECS", self.refresh_token_secs),
            ("SESSION_LIFETIME_SECS", self.session_secs),
        ]
        .into_iter()
        .chain(
            self.scope_access_token_secs
                .iter()
                .map(|(scope, secs)| (scope.as_str(), *secs)),
        )
    }

    fn all(&self) -> impl Iterator<Item = (&str, i64)> {
        [
            ("AUTHORIZATION_CODE_LIFETIME_SECS", self.authorization_code_secs),
            ("DEVICE_CODE_LIFETIME_SECS", self.device_code_secs),
            ("DEVICE_POLL_INTERVAL_SECS", self.device_poll_interval_secs),
            ("ACCESS_TOKEN_LIFETIME_SECS", self.access_token_secs),
            ("IDENTITY_TOKEN_LIFETIME_SECS", self.identity_token_secs),
            ("REFRESH_TOKEN_LIFETIME_SECS", self.refresh_token_secs),
            ("SESSION_LIFETIME_SECS", self.session_secs),
        ]
        .into_iter()
        .chain(
            self.scope_access_token_secs
                .iter()
                .map(|(scope, secs)| (scope.as_str(), *secs)),
        )
    }
}

/// Signing key lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Age after which the current signing key is replaced
    pub rotation_interval_days: i64,
    /// How long a retired key stays in the verification set
    pub retention_secs: i64,
    /// RSA modulus size
    pub rsa_key_bits: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            rotation_interval_days: lifetimes::KEY_ROTATION_DAYS,
            retention_secs: lifetimes::REFRESH_TOKEN_SECS + 86_400,
            rsa_key_bits: 2048,
        }
    }
}

/// Background sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between passes
    pub interval_secs: u64,
    /// How long revoked refresh tokens are kept for replay detection
    pub revoked_retention_secs: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            revoked_retention_secs: lifetimes::REVOKED_RETENTION_SECS,
        }
    }
}

/// Per-IP rate limiting of credential-bearing endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests per window
    pub requests_per_window: u32,
    /// Window duration in seconds
    pub window_seconds: u64,
    /// Map size that triggers cleanup of stale entries
    pub cleanup_threshold: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 60,
            window_seconds: 60,
            cleanup_threshold: 10_000,
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Issuer identifier, also the public base URL
    pub issuer: String,
    /// HTTP listener
    pub http: HttpConfig,
    /// Persistence
    pub database: DatabaseConfig,
    /// Base64 master encryption key
    #[serde(skip_serializing)]
    pub master_encryption_key: Option<String>,
    /// Token lifetimes
    pub lifetimes: TokenLifetimes,
    /// Extra access token audiences keyed by scope
    pub resource_audiences: BTreeMap<String, String>,
    /// Signing keys
    pub keys: KeyConfig,
    /// Sweeper
    pub sweeper: SweeperConfig,
    /// Rate limiting
    pub rate_limit: RateLimitConfig,
    /// YAML file with clients and users to seed
    pub seed_file: Option<PathBuf>,
    /// Permit an `http://` loopback issuer (local development)
    pub allow_insecure_transport: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.into(),
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            master_encryption_key: None,
            lifetimes: TokenLifetimes::default(),
            resource_audiences: BTreeMap::from([(
                scopes::DATA_EVENT_RECORDS.to_owned(),
                DATA_EVENT_RECORDS_AUDIENCE.to_owned(),
            )]),
            keys: KeyConfig::default(),
            sweeper: SweeperConfig::default(),
            rate_limit: RateLimitConfig::default(),
            seed_file: None,
            allow_insecure_transport: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result fails [`Self::validate`]
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        if let Err(e) = dotenvy::dotenv() {
            warn!("No .env file found or failed to load: {}", e);
        }

        let defaults = Self::default();
        let refresh_token_secs = env_parse(
            "REFRESH_TOKEN_LIFETIME_SECS",
            defaults.lifetimes.refresh_token_secs,
        )?;

        let config = Self {
            issuer: env_var_or("OIDC_ISSUER", DEFAULT_ISSUER),
            http: HttpConfig {
                host: env_var_or("HTTP_HOST", &defaults.http.host),
                port: env_parse("HTTP_PORT", defaults.http.port)?,
                request_timeout_secs: env_parse(
                    "HTTP_REQUEST_TIMEOUT_SECS",
                    defaults.http.request_timeout_secs,
                )?,
                max_body_bytes: env_parse("HTTP_MAX_BODY_BYTES", defaults.http.max_body_bytes)?,
                cors_origins: parse_origins(&env_var_or("CORS_ALLOWED_ORIGINS", "*")),
            },
            database: DatabaseConfig {
                url: DatabaseUrl::parse_url(&env_var_or("DATABASE_URL", DEFAULT_DATABASE_URL)),
                allow_in_memory: env_parse("ALLOW_IN_MEMORY_DATABASE", false)?,
            },
            master_encryption_key: env::var("OIDC_MASTER_ENCRYPTION_KEY").ok(),
            lifetimes: TokenLifetimes {
                authorization_code_secs: env_parse(
                    "AUTHORIZATION_CODE_LIFETIME_SECS",
                    defaults.lifetimes.authorization_code_secs,
                )?,
                device_code_secs: env_parse(
                    "DEVICE_CODE_LIFETIME_SECS",
                    defaults.lifetimes.device_code_secs,
                )?,
                device_poll_interval_secs: env_parse(
                    "DEVICE_POLL_INTERVAL_SECS",
                    defaults.lifetimes.device_poll_interval_secs,
                )?,
                access_token_secs: env_parse(
                    "ACCESS_TOKEN_LIFETIME_SECS",
                    defaults.lifetimes.access_token_secs,
                )?,
                identity_token_secs: env_parse(
                    "IDENTITY_TOKEN_LIFETIME_SECS",
                    defaults.lifetimes.identity_token_secs,
                )?,
                refresh_token_secs,
                session_secs: env_parse("SESSION_LIFETIME_SECS", defaults.lifetimes.session_secs)?,
                scope_access_token_secs: parse_scope_map(&env_var_or(
                    "ACCESS_TOKEN_SCOPE_LIFETIMES",
                    "",
                ))?,
            },
            resource_audiences: match env::var("RESOURCE_AUDIENCES") {
                Ok(value) => parse_scope_map(&value)?,
                Err(_) => defaults.resource_audiences,
            },
            keys: KeyConfig {
                rotation_interval_days: env_parse(
                    "KEY_ROTATION_INTERVAL_DAYS",
                    defaults.keys.rotation_interval_days,
                )?,
                retention_secs: env_parse("KEY_RETENTION_SECS", refresh_token_secs + 86_400)?,
                rsa_key_bits: env_parse("RSA_KEY_BITS", defaults.keys.rsa_key_bits)?,
            },
            sweeper: SweeperConfig {
                interval_secs: env_parse("SWEEP_INTERVAL_SECS", defaults.sweeper.interval_secs)?,
                revoked_retention_secs: env_parse(
                    "REVOKED_RETENTION_SECS",
                    defaults.sweeper.revoked_retention_secs,
                )?,
            },
            rate_limit: RateLimitConfig {
                enabled: env_parse("RATE_LIMIT_ENABLED", defaults.rate_limit.enabled)?,
                requests_per_window: env_parse(
                    "RATE_LIMIT_REQUESTS",
                    defaults.rate_limit.requests_per_window,
                )?,
                window_seconds: env_parse(
                    "RATE_LIMIT_WINDOW_SECS",
                    defaults.rate_limit.window_seconds,
                )?,
                cleanup_threshold: defaults.rate_limit.cleanup_threshold,
            },
            seed_file: env::var("OIDC_SEED_FILE").ok().map(PathBuf::from),
            allow_insecure_transport: env_parse("ALLOW_INSECURE_TRANSPORT", false)?,
        };

        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Plain HTTP is only accepted for a loopback issuer with
    /// `ALLOW_INSECURE_TRANSPORT=true`, and in-memory storage only with
    /// `ALLOW_IN_MEMORY_DATABASE=true`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let issuer = Url::parse(&self.issuer)
            .with_context(|| format!("OIDC_ISSUER is not a valid URL: {}", self.issuer))?;

        if issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(anyhow!("OIDC_ISSUER must not contain a query or fragment"));
        }

        match issuer.scheme() {
            "https" => {}
            "http" => {
                let loopback = match issuer.host() {
                    Some(Host::Domain(domain)) => domain == "localhost",
                    Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
                    Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
                    None => false,
                };
                if !(self.allow_insecure_transport && loopback) {
                    return Err(anyhow!(
                        "OIDC_ISSUER must use https; http is only allowed for a loopback host with ALLOW_INSECURE_TRANSPORT=true"
                    ));
                }
                warn!("Transport security disabled for local development");
            }
            scheme => return Err(anyhow!("Unsupported OIDC_ISSUER scheme: {scheme}")),
        }

        if self.database.url.is_memory() && !self.database.allow_in_memory {
            return Err(anyhow!(
                "In-memory database is not durable; set ALLOW_IN_MEMORY_DATABASE=true for tests"
            ));
        }

        if let Some((name, secs)) = self.lifetimes.all().find(|(_, secs)| *secs <= 0) {
            return Err(anyhow!("{name} must be positive, got {secs}"));
        }

        if self.keys.rotation_interval_days <= 0 || self.keys.retention_secs <= 0 {
            return Err(anyhow!("Key rotation interval and retention must be positive"));
        }

        if let Some((name, secs)) = self
            .lifetimes
            .signed_token_lifetimes()
            .find(|(_, secs)| *secs > self.keys.retention_secs)
        {
            return Err(anyhow!(
                "KEY_RETENTION_SECS ({}) must cover {name} ({secs}); tokens must stay verifiable after rotation",
                self.keys.retention_secs
            ));
        }

        if self.keys.rsa_key_bits < 2048 {
            return Err(anyhow!("RSA_KEY_BITS must be at least 2048"));
        }

        if self.sweeper.interval_secs == 0 {
            return Err(anyhow!("SWEEP_INTERVAL_SECS must be positive"));
        }

        Ok(())
    }

    /// Issuer without a trailing slash
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Absolute URL of an endpoint path
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{path}", self.issuer())
    }

    /// Whether cookies must carry the `Secure` attribute
    #[must_use]
    pub fn uses_https(&self) -> bool {
        self.issuer.starts_with("https://")
    }

    /// Get a summary of the configuration for logging (without secrets)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "OIDC Provider Configuration:\n\
             - Issuer: {}\n\
             - HTTP: {}:{}\n\
             - Database: {}\n\
             - Master key: {}\n\
             - Access token lifetime: {}s\n\
             - Refresh token lifetime: {}s\n\
             - Key rotation: every {} days\n\
             - Sweep interval: {}s\n\
             - Rate limiting: {}",
            self.issuer,
            self.http.host,
            self.http.port,
            self.database.url,
            if self.master_encryption_key.is_some() {
                "Configured"
            } else {
                "Ephemeral"
            },
            self.lifetimes.access_token_secs,
            self.lifetimes.refresh_token_secs,
            self.keys.rotation_interval_days,
            self.sweeper.interval_secs,
            if self.rate_limit.enabled {
                "Enabled"
            } else {
                "Disabled"
            },
        )
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to `default` when unset
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {key} value '{value}': {e}")),
        Err(_) => Ok(default),
    }
}

/// Parse `scope=value,scope=value`
fn parse_scope_map<T>(value: &str) -> Result<BTreeMap<String, T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (scope, setting) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected scope=value, got '{entry}'"))?;
            let parsed = setting
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid value for scope '{scope}': {e}"))?;
            Ok((scope.trim().to_owned(), parsed))
        })
        .collect()
}

/// Parse comma-separated CORS origins
fn parse_origins(origins_str: &str) -> Vec<String> {
    if origins_str.trim() == "*" {
        vec!["*".to_owned()]
    } else {
        origins_str
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
