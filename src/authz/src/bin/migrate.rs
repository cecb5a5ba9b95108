//! # Rolegate schema migration tool
//!
//! Connects to the configured store, applies pending schema migrations and
//! reports pool statistics and health. Seeds no data.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `ROLEGATE_DATABASE_URL` - store URL
//! - `ROLEGATE_POOL_MAX_OPEN`, `ROLEGATE_POOL_MAX_IDLE`,
//!   `ROLEGATE_POOL_MAX_LIFETIME_SECS` - pool limits
//! - `RUST_LOG` - Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use rolegate_authz::store::{known_migrations, AssignmentStore};
use rolegate_authz::{PoolManager, ServiceConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Rolegate migrate v{}", rolegate_authz::VERSION);

    let config = ServiceConfig::from_env();
    config.validate().context("invalid pool configuration")?;

    info!("Configuration:");
    info!("  Pool max open: {}", config.pool.max_open);
    info!("  Pool max idle: {}", config.pool.max_idle);
    info!("  Pool max lifetime: {:?}", config.pool.max_lifetime);

    let pool = PoolManager::connect(&config.database_url, config.pool.clone())
        .await
        .context("failed to connect to the assignment store")?;
    let pool = Arc::new(pool);

    let store = AssignmentStore::new(pool.clone(), config.audit_trail);
    let applied = store
        .run_migrations()
        .await
        .context("failed to apply migrations")?;
    info!("Applied {} of {} known migrations", applied, known_migrations());

    let stats = pool.stats();
    info!(
        "Pool stats: open={}, in_use={}, idle={}, wait_count={}",
        stats.open, stats.in_use, stats.idle, stats.wait_count
    );

    let healthy = pool.is_healthy().await;
    pool.close().await;

    if healthy {
        info!("Store healthy");
        Ok(())
    } else {
        error!("Store failed its health probe after migrating");
        anyhow::bail!("store unhealthy")
    }
}
