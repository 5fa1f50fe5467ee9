//! ctl-service configuration.
//!
//! Configuration is loaded from environment variables once at startup and is
//! immutable afterwards. A missing issuer or audience is fatal.

use crate::auth::JwksStoreOptions;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9999";

/// Group allow-list applied when `OIDC_ALLOWED_GROUPS` is unset or empty.
pub const DEFAULT_ALLOWED_GROUPS: &[&str] = &["engineering"];

/// Default JWKS refresh interval (hourly).
pub const DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS: u64 = 3600;

/// Default timeout for a single JWKS fetch.
pub const DEFAULT_JWKS_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default number of missed refresh intervals before the key set is degraded.
pub const DEFAULT_JWKS_MAX_STALE_INTERVALS: u32 = 3;

/// Default expiration leeway. Tokens are rejected the second after `exp`.
pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 0;

/// Upper bound on the configurable expiration leeway (10 minutes).
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 600;

/// Token validation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Identity provider issuer URL. Tokens must carry exactly this `iss`.
    pub issuer_url: String,

    /// Audience this service accepts (e.g. `https://k8sctl-prod.example.com`).
    pub audience: String,

    /// Groups allowed to call protected routes. Empty means any authenticated identity.
    pub allowed_groups: Vec<String>,

    /// Seconds past `exp` a token is still accepted.
    pub clock_skew_seconds: u64,
}

impl AuthConfig {
    /// Key-discovery URL under the issuer.
    pub fn jwks_url(&self) -> String {
        format!(
            "{}/.well-known/jwks.json",
            self.issuer_url.trim_end_matches('/')
        )
    }
}

/// ctl-service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:9999").
    pub bind_address: String,

    /// Token validation policy.
    pub auth: AuthConfig,

    /// JWKS refresh and staleness settings.
    pub jwks: JwksStoreOptions,

    /// Seconds to keep draining connections after a shutdown signal.
    pub drain_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWKS configuration: {0}")]
    InvalidJwksSetting(String),

    #[error("Invalid drain period: {0}")]
    InvalidDrainPeriod(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer_url = required(vars, "OIDC_ISSUER_URL")?;
        let audience = required(vars, "OIDC_AUDIENCE")?;

        let mut allowed_groups: Vec<String> = vars
            .get("OIDC_ALLOWED_GROUPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if allowed_groups.is_empty() {
            allowed_groups = DEFAULT_ALLOWED_GROUPS
                .iter()
                .map(ToString::to_string)
                .collect();
        }

        let clock_skew_seconds = match vars.get("JWT_CLOCK_SKEW_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidJwtClockSkew(format!(
                        "JWT_CLOCK_SKEW_SECONDS must be a non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value > MAX_CLOCK_SKEW_SECONDS {
                    return Err(ConfigError::InvalidJwtClockSkew(format!(
                        "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                        MAX_CLOCK_SKEW_SECONDS, value
                    )));
                }

                value
            }
            None => DEFAULT_CLOCK_SKEW_SECONDS,
        };

        let refresh_interval = positive_seconds(
            vars,
            "JWKS_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS,
        )?;
        let http_timeout = positive_seconds(
            vars,
            "JWKS_HTTP_TIMEOUT_SECONDS",
            DEFAULT_JWKS_HTTP_TIMEOUT_SECONDS,
        )?;

        let max_stale_intervals = match vars.get("JWKS_MAX_STALE_INTERVALS") {
            Some(value_str) => {
                let value: u32 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidJwksSetting(format!(
                        "JWKS_MAX_STALE_INTERVALS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;
                if value == 0 {
                    return Err(ConfigError::InvalidJwksSetting(
                        "JWKS_MAX_STALE_INTERVALS must be greater than 0".to_string(),
                    ));
                }
                value
            }
            None => DEFAULT_JWKS_MAX_STALE_INTERVALS,
        };

        let drain_seconds = match vars.get("DRAIN_SECONDS") {
            Some(value_str) => value_str.parse().map_err(|e| {
                ConfigError::InvalidDrainPeriod(format!(
                    "DRAIN_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?,
            None => 0,
        };

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        Ok(Config {
            bind_address,
            auth: AuthConfig {
                issuer_url,
                audience,
                allowed_groups,
                clock_skew_seconds,
            },
            jwks: JwksStoreOptions {
                refresh_interval: Duration::from_secs(refresh_interval),
                http_timeout: Duration::from_secs(http_timeout),
                max_stale_intervals,
            },
            drain_seconds,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidJwksSetting(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidJwksSetting(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(value)
}
