//! ============================================================================
//! Gate Configuration - Environment-driven settings
//! ============================================================================
//! Values come from the process environment; binaries load a `.env` file
//! with dotenvy before calling [`GateConfig::from_env`].
//! ============================================================================

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::access::DEFAULT_ORACLE_TIMEOUT;
use crate::types::RequiredGroups;

/// Default long-poll timeout for getUpdates
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub bot_token: String,
    pub groups: RequiredGroups,
    /// Overrides the store's default location when set
    pub db_path: Option<String>,
    pub oracle_timeout: Duration,
    pub poll_timeout: Duration,
}

impl GateConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment, or a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("{} is not set", key))
        };
        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| anyhow!("Invalid {} '{}': {}", key, raw, e)),
                None => Ok(default),
            }
        };

        // Every membership lookup needs a nonzero time budget
        let oracle_timeout = seconds("ORACLE_TIMEOUT_SECS", DEFAULT_ORACLE_TIMEOUT)?;
        if oracle_timeout.is_zero() {
            return Err(anyhow!("Invalid ORACLE_TIMEOUT_SECS '0': must be at least 1 second"));
        }

        Ok(Self {
            bot_token: required("TELEGRAM_BOT_TOKEN")?,
            groups: RequiredGroups::new(
                &required("REQUIRED_CHANNEL_USERNAME")?,
                &required("REQUIRED_GROUP_USERNAME")?,
            ),
            db_path: lookup("JOINGATE_DB_PATH").filter(|p| !p.trim().is_empty()),
            oracle_timeout,
            poll_timeout: seconds("POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT)?,
        })
    }
}
