use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::security::SecretString;

/// Reads `MIRO_{name}` first, falling back to the bare `{name}`.
fn var(name: &str) -> Option<String> {
    env::var(format!("MIRO_{name}")).or_else(|_| env::var(name)).ok()
}

fn require(name: &str) -> Result<String> {
    var(name).with_context(|| format!("{name} must be set"))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw.parse().with_context(|| format!("{name} must be a valid number")),
        None => Ok(default),
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub cors_origins: Vec<String>,
    pub api_url: String,

    pub client_id: String,
    pub client_secret: SecretString,
    pub oauth_auth_base: String,
    pub oauth_token_url: String,
    pub oauth_scope: String,
    pub oauth_redirect_uri: String,

    pub webhook_secret: SecretString,
    pub encryption_keys: Vec<String>,

    pub http_timeout_seconds: u64,
    pub worker_count: usize,

    pub bucket_reservoir: u32,
    pub bucket_refresh_ms: u64,

    pub idempotency_cache_size: usize,
    pub idempotency_cache_ttl_seconds: u64,
    pub idempotency_cleanup_seconds: u64,

    pub cache_ttl_seconds: u64,
    pub cache_cleanup_seconds: u64,

    pub log_max_entries: usize,
    pub log_max_payload_bytes: usize,

    pub port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("cors_origins", &self.cors_origins)
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("oauth_auth_base", &self.oauth_auth_base)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables, checking `MIRO_{name}` before `{name}`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            cors_origins: var("CORS_ORIGINS")
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            api_url: var("API_URL").unwrap_or_else(|| "https://api.miro.com".to_string()),

            client_id: require("CLIENT_ID")?,
            client_secret: SecretString::from(require("CLIENT_SECRET")?),
            oauth_auth_base: var("OAUTH_AUTH_BASE")
                .unwrap_or_else(|| "https://miro.com/oauth/authorize".to_string()),
            oauth_token_url: var("OAUTH_TOKEN_URL")
                .unwrap_or_else(|| "https://api.miro.com/v1/oauth/token".to_string()),
            oauth_scope: var("OAUTH_SCOPE").unwrap_or_else(|| "boards:read boards:write".to_string()),
            oauth_redirect_uri: require("OAUTH_REDIRECT_URI")?,

            webhook_secret: SecretString::from(require("WEBHOOK_SECRET")?),
            encryption_keys: var("ENCRYPTION_KEY")
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),

            http_timeout_seconds: parse_or("HTTP_TIMEOUT_SECONDS", 10)?,
            worker_count: parse_or("WORKER_COUNT", num_cpus::get())?,

            bucket_reservoir: parse_or("BUCKET_RESERVOIR", 1)?,
            bucket_refresh_ms: parse_or("BUCKET_REFRESH_MS", 600)?,

            idempotency_cache_size: parse_or("IDEMPOTENCY_CACHE_SIZE", 128)?,
            idempotency_cache_ttl_seconds: parse_or("IDEMPOTENCY_CACHE_TTL_SECONDS", 60)?,
            idempotency_cleanup_seconds: parse_or("IDEMPOTENCY_CLEANUP_SECONDS", 86400)?,

            cache_ttl_seconds: parse_or("CACHE_TTL_SECONDS", 86400)?,
            cache_cleanup_seconds: parse_or("CACHE_CLEANUP_SECONDS", 86400)?,

            log_max_entries: parse_or("LOG_MAX_ENTRIES", 1000)?,
            log_max_payload_bytes: parse_or("LOG_MAX_PAYLOAD_BYTES", 1024 * 1024)?,

            port: parse_or("PORT", 8080)?,
        })
    }
}
