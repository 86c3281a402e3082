//! Hub configuration

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};
use hearth_shared_config::{get_env_or, CommonConfig, Environment};

use crate::services::secret::token_secret;
use crate::websocket::{DefaultSubscription, SessionSettings};

/// Minimum length for the token secret to count as secure
const MIN_SECRET_LENGTH: usize = 32;

/// Hub configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with companion services
    pub common: CommonConfig,

    /// Server port (default: 8098)
    pub port: u16,

    /// Token signing secret; absent means auth is disabled (dev only)
    pub token_secret: Option<String>,

    /// Token lifetime in seconds (default: 3600, floor 60)
    pub token_ttl_secs: i64,

    /// Path to the JSON credential file (optional)
    pub credentials_path: Option<String>,

    /// CORS allowed origins (optional)
    pub cors_allowed_origins: Option<Vec<String>>,

    /// Protocol engine tunables
    pub session: SessionSettings,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// In production mode the token secret must be configured (via
    /// `HEARTH_SECRET_FILE` or `HEARTH_TOKEN_SECRET`) and at least
    /// `MIN_SECRET_LENGTH` characters. In development the hub runs
    /// unauthenticated with a warning when no secret is set.
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        let token_secret = Self::load_token_secret(common.environment)?;

        Ok(Self {
            common,
            port: get_env_or("HEARTH_PORT", 8098u16)?,
            token_secret,
            token_ttl_secs: get_env_or("HEARTH_TOKEN_TTL_SECS", 3600i64)?,
            credentials_path: env::var("HEARTH_CREDENTIALS_FILE")
                .ok()
                .filter(|s| !s.is_empty()),
            cors_allowed_origins: env::var("HEARTH_CORS_ORIGINS").ok().map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            session: SessionSettings {
                max_msg_bytes: get_env_or("HEARTH_MAX_MSG_BYTES", 65536usize)?,
                max_events_per_second: get_env_or("HEARTH_MAX_EVENTS_PER_SECOND", 200u32)?,
                metrics_flush_interval: Duration::from_secs(get_env_or(
                    "HEARTH_METRICS_FLUSH_SECS",
                    60u64,
                )?),
                default_subscription: get_env_or(
                    "HEARTH_DEFAULT_SUBSCRIPTION",
                    DefaultSubscription::All,
                )?,
                device_pattern: env::var("HEARTH_DEVICE_PATTERN")
                    .unwrap_or_else(|_| "hearth.devices.*".to_string()),
                room_pattern: env::var("HEARTH_ROOM_PATTERN")
                    .unwrap_or_else(|_| "hearth.rooms.*".to_string()),
                scene_prefix: env::var("HEARTH_SCENE_PREFIX")
                    .unwrap_or_else(|_| "hearth.scenes.".to_string()),
            },
        })
    }

    fn load_token_secret(environment: Environment) -> Result<Option<String>> {
        match token_secret() {
            Some(secret) => {
                if environment.is_production() && secret.len() < MIN_SECRET_LENGTH {
                    bail!(
                        "token secret must be at least {} characters in production (got {})",
                        MIN_SECRET_LENGTH,
                        secret.len()
                    );
                }
                Ok(Some(secret.to_string()))
            }
            None if environment.is_production() => {
                bail!(
                    "a token secret is required in production. \
                     Set HEARTH_SECRET_FILE or HEARTH_TOKEN_SECRET."
                );
            }
            None => {
                tracing::warn!(
                    "No token secret configured, running unauthenticated. \
                     This is only acceptable in development mode."
                );
                Ok(None)
            }
        }
    }

    pub fn is_production(&self) -> bool {
        self.common.environment.is_production()
    }
}
