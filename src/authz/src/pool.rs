//! Connection pool manager
//!
//! Owns the sqlx connection pool behind the assignment store, applies runtime
//! reconfiguration, and exposes point-in-time statistics and a bounded health
//! probe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Transaction};
use tracing::{debug, info, warn};

use crate::error::{AuthzError, Result};

/// Health probes give up after this long
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Idle connections above `max_idle` are closed after this long
const IDLE_REAP_AFTER: Duration = Duration::from_secs(60);

/// Connection pool tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum open connections
    pub max_open: u32,

    /// Idle connections kept warm
    ///
    /// This is a floor, not a cap: the pool opens up to `max_idle`
    /// connections eagerly and keeps them even when nothing uses them.
    /// Idle connections above it are closed after a minute.
    pub max_idle: u32,

    /// Connections are recycled after this age
    pub max_lifetime: Duration,

    /// Maximum wait for a connection lease
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 25,
            max_idle: 5,
            max_lifetime: Duration::from_secs(1800),
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

impl PoolConfig {
    pub fn new(max_open: u32, max_idle: u32, max_lifetime: Duration) -> Self {
        Self {
            max_open,
            max_idle,
            max_lifetime,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_open == 0 {
            return Err(AuthzError::InvalidConfig(
                "Pool max_open must be at least 1".to_string(),
            ));
        }
        if self.max_idle > self.max_open {
            return Err(AuthzError::InvalidConfig(format!(
                "Pool max_idle ({}) cannot exceed max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        if self.max_lifetime.is_zero() {
            return Err(AuthzError::InvalidConfig(
                "Pool max_lifetime must be non-zero".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(AuthzError::InvalidConfig(
                "Pool acquire_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn options(&self) -> AnyPoolOptions {
        AnyPoolOptions::new()
            .max_connections(self.max_open)
            .min_connections(self.max_idle)
            .idle_timeout(Some(IDLE_REAP_AFTER))
            .max_lifetime(Some(self.max_lifetime))
            .acquire_timeout(self.acquire_timeout)
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently open
    pub open: u32,
    /// Open connections leased out
    pub in_use: u32,
    pub idle: u32,
    /// Leases that found the pool saturated and had to wait
    pub wait_count: u64,
    /// Total time spent waiting for saturated leases
    pub wait_duration: Duration,
    pub max_open: u32,
}

struct PoolState {
    pool: AnyPool,
    config: PoolConfig,
}

/// Owns and tunes the database connection pool
pub struct PoolManager {
    url: String,
    state: RwLock<PoolState>,
    wait_count: AtomicU64,
    wait_nanos: AtomicU64,
}

impl PoolManager {
    /// Connects a pool to `url` (`postgres://…` or `sqlite://…`)
    pub async fn connect(url: &str, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        install_default_drivers();

        let pool = config
            .options()
            .connect(url)
            .await
            .map_err(|e| AuthzError::StoreUnavailable(format!("Failed to connect to database: {}", e)))?;

        info!(
            "Connection pool ready: max_open={}, max_idle={}, max_lifetime={:?}",
            config.max_open, config.max_idle, config.max_lifetime
        );

        Ok(Self {
            url: url.to_string(),
            state: RwLock::new(PoolState { pool, config }),
            wait_count: AtomicU64::new(0),
            wait_nanos: AtomicU64::new(0),
        })
    }

    /// Applies new pool limits
    ///
    /// Subsequent leases come from a pool built with the new limits. Leases
    /// already handed out stay valid; the previous pool closes in the
    /// background once they are returned.
    pub async fn configure(&self, config: PoolConfig) -> Result<()> {
        config.validate()?;

        let pool = config
            .options()
            .connect(&self.url)
            .await
            .map_err(|e| AuthzError::StoreUnavailable(format!("Failed to reconnect pool: {}", e)))?;

        let previous = {
            let mut state = self.state.write();
            let previous = std::mem::replace(&mut state.pool, pool);
            state.config = config.clone();
            previous
        };

        info!(
            "Connection pool reconfigured: max_open={}, max_idle={}, max_lifetime={:?}",
            config.max_open, config.max_idle, config.max_lifetime
        );

        tokio::spawn(async move {
            previous.close().await;
            debug!("Previous connection pool drained and closed");
        });

        Ok(())
    }

    /// Current pool limits
    pub fn config(&self) -> PoolConfig {
        self.state.read().config.clone()
    }

    /// Non-blocking statistics snapshot
    pub fn stats(&self) -> PoolStats {
        let state = self.state.read();
        let open = state.pool.size();
        let idle = u32::try_from(state.pool.num_idle()).unwrap_or(u32::MAX).min(open);

        PoolStats {
            open,
            in_use: open - idle,
            idle,
            wait_count: self.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed)),
            max_open: state.config.max_open,
        }
    }

    /// Round-trip probe bounded by [`HEALTH_PROBE_TIMEOUT`]
    pub async fn is_healthy(&self) -> bool {
        let pool = self.pool();
        if pool.is_closed() {
            return false;
        }

        let probe = async {
            let mut conn = pool.acquire().await?;
            sqlx::query("SELECT 1").execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        };

        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Health probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Health probe timed out after {:?}", HEALTH_PROBE_TIMEOUT);
                false
            }
        }
    }

    /// Handle to the current pool
    pub fn pool(&self) -> AnyPool {
        self.state.read().pool.clone()
    }

    /// Leases a connection, returned to the pool when dropped
    pub(crate) async fn acquire(&self) -> Result<PoolConnection<Any>> {
        let (pool, waited) = self.lease_start();
        let conn = pool.acquire().await?;
        self.lease_end(waited);
        Ok(conn)
    }

    /// Leases a connection with an open transaction
    ///
    /// Dropping the transaction without committing rolls it back.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Any>> {
        let (pool, waited) = self.lease_start();
        let tx = pool.begin().await?;
        self.lease_end(waited);
        Ok(tx)
    }

    /// Closes the pool; later leases fail with `StoreUnavailable`
    pub async fn close(&self) {
        self.pool().close().await;
    }

    fn lease_start(&self) -> (AnyPool, Option<Instant>) {
        let state = self.state.read();
        let saturated = state.pool.num_idle() == 0 && state.pool.size() >= state.config.max_open;
        if saturated {
            self.wait_count.fetch_add(1, Ordering::Relaxed);
        }
        (state.pool.clone(), saturated.then(Instant::now))
    }

    fn lease_end(&self, waited: Option<Instant>) {
        if let Some(start) = waited {
            let nanos = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.wait_nanos.fetch_add(nanos, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config())
            .field("stats", &self.stats())
            .finish()
    }
}
