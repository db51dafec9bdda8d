use std::str::FromStr;

use crate::event_sourcing::store::DEFAULT_SNAPSHOT_INTERVAL;

// ============================================================================
// Store Configuration - Environment Driven
// ============================================================================
//
// Variables (a `.env` file is honoured when present):
// - DATABASE_URL: PostgreSQL connection string, unset = in-memory backend
// - SNAPSHOT_INTERVAL: events between snapshots (default 10, must be >= 1)
// - SNAPSHOTS_ENABLED: attach a snapshot repository (default true)
// - REQUIRE_SUBSCRIBERS: fail publish when nobody listens (default true)
// - DB_MAX_CONNECTIONS: pool size (default 5)
//
// ============================================================================

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub snapshot_interval: i64,
    pub snapshots_enabled: bool,
    pub require_subscribers: bool,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            snapshots_enabled: true,
            require_subscribers: true,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StoreConfig {
    /// Read the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let snapshot_interval = parse_or(&lookup, "SNAPSHOT_INTERVAL", defaults.snapshot_interval)?;
        if snapshot_interval < 1 {
            return Err(ConfigError::Invalid {
                key: "SNAPSHOT_INTERVAL",
                value: snapshot_interval.to_string(),
                reason: "must be at least 1".into(),
            });
        }

        let max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.max_connections)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            database_url,
            snapshot_interval,
            snapshots_enabled: parse_or(&lookup, "SNAPSHOTS_ENABLED", defaults.snapshots_enabled)?,
            require_subscribers: parse_or(&lookup, "REQUIRE_SUBSCRIBERS", defaults.require_subscribers)?,
            max_connections,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        if self.database_url.is_some() {
            "postgres"
        } else {
            "in-memory"
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
