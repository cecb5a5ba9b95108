//! Service configuration
//!
//! Environment variables read by [`ServiceConfig::from_env`]:
//! - `ROLEGATE_DATABASE_URL` - store URL (default: `sqlite://rolegate.db?mode=rwc`)
//! - `ROLEGATE_POOL_MAX_OPEN` - maximum open connections (default: 25)
//! - `ROLEGATE_POOL_MAX_IDLE` - idle connections kept warm (default: 5)
//! - `ROLEGATE_POOL_MAX_LIFETIME_SECS` - connection recycle age (default: 1800)
//! - `ROLEGATE_AUDIT_TRAIL` - record grant/revoke events (default: false)
//! - `ROLEGATE_SCOPE_CACHE_TTL_SECS` - ancestor chain cache TTL (default: 60)
//!
//! Unparsable values fall back to the default.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::pool::PoolConfig;
use crate::scope::DEFAULT_CACHE_TTL;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://rolegate.db?mode=rwc";

/// Top-level configuration for [`crate::AuthzService::connect`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// `postgres://…` or `sqlite://…`
    pub database_url: String,

    pub pool: PoolConfig,

    /// Append grant and revocation events to the audit table
    pub audit_trail: bool,

    /// TTL for cached scope ancestor chains; zero disables caching
    pub hierarchy_cache_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            pool: PoolConfig::default(),
            audit_trail: false,
            hierarchy_cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from `ROLEGATE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pool = PoolConfig {
            max_open: parse_or(&lookup, "ROLEGATE_POOL_MAX_OPEN", defaults.pool.max_open),
            max_idle: parse_or(&lookup, "ROLEGATE_POOL_MAX_IDLE", defaults.pool.max_idle),
            max_lifetime: Duration::from_secs(parse_or(
                &lookup,
                "ROLEGATE_POOL_MAX_LIFETIME_SECS",
                defaults.pool.max_lifetime.as_secs(),
            )),
            ..defaults.pool
        };

        Self {
            database_url: lookup("ROLEGATE_DATABASE_URL").unwrap_or(defaults.database_url),
            pool,
            audit_trail: parse_or(&lookup, "ROLEGATE_AUDIT_TRAIL", defaults.audit_trail),
            hierarchy_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "ROLEGATE_SCOPE_CACHE_TTL_SECS",
                defaults.hierarchy_cache_ttl.as_secs(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}='{}', using default", key, raw);
            default
        }),
        None => default,
    }
}
