//! Process configuration read once at startup

use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_DATABASE_URL: &str = "sqlite://pg_api.db";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/auth/callback";
/// Ten years
const MAX_TOKEN_TTL_HOURS: i64 = 24 * 366 * 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Credentials registered with the identity provider
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub provider_timeout: Duration,
    pub oauth_state_ttl: Duration,
    pub google: GoogleOAuthConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    ///
    /// A missing or empty `JWT_SECRET` is an error: the server must not start
    /// without a signing key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let token_ttl_hours = parse_or(&lookup, "TOKEN_TTL_HOURS", 24i64)?;
        let token_ttl = Some(token_ttl_hours)
            .filter(|hours| (1..=MAX_TOKEN_TTL_HOURS).contains(hours))
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| ConfigError::Invalid {
                key: "TOKEN_TTL_HOURS",
                value: token_ttl_hours.to_string(),
            })?;

        let provider_timeout_secs = parse_or(&lookup, "PROVIDER_TIMEOUT_SECS", 10u64)?;
        let oauth_state_ttl_secs = parse_or(&lookup, "OAUTH_STATE_TTL_SECS", 600u64)?;
        let port = parse_or(&lookup, "PORT", 8080u16)?;

        let google = GoogleOAuthConfig {
            client_id: lookup("GOOGLE_CLIENT_ID").unwrap_or_default(),
            client_secret: lookup("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            redirect_url: lookup("GOOGLE_REDIRECT_URL")
                .unwrap_or_else(|| DEFAULT_REDIRECT_URL.to_string()),
        };
        if google.client_id.is_empty() || google.client_secret.is_empty() {
            warn!("GOOGLE_CLIENT_ID or GOOGLE_CLIENT_SECRET not set, Google login will fail");
        }

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        // Credentialed CORS cannot be combined with a wildcard origin.
        if cors_origins.iter().any(|origin| origin == "*") {
            return Err(ConfigError::Invalid {
                key: "CORS_ORIGINS",
                value: cors_origins.join(","),
            });
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            port,
            cors_origins,
            jwt_secret,
            token_ttl,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            oauth_state_ttl: Duration::from_secs(oauth_state_ttl_secs),
            google,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
