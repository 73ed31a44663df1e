//! Postgres connection pool.
//!
//! Each running investigation holds at most one connection at a time (index
//! write-through or a review-queue insert), so the pool is sized from the
//! worker's concurrency plus headroom for index hydration and the CLI.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use reid_core::defaults::INVESTIGATION_MAX_CONCURRENT;
use reid_core::{Error, Result};

/// Connections kept beyond one per concurrent investigation.
const POOL_HEADROOM: u32 = 2;

/// Environment variable holding the Postgres connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable overriding the derived pool size.
pub const ENV_DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";

/// Environment variable for the acquire timeout.
pub const ENV_DATABASE_ACQUIRE_TIMEOUT: &str = "DATABASE_ACQUIRE_TIMEOUT_SECS";

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_concurrency(INVESTIGATION_MAX_CONCURRENT)
    }
}

impl PoolConfig {
    /// Size the pool for `investigations` running at once.
    pub fn for_concurrency(investigations: usize) -> Self {
        let investigations = u32::try_from(investigations.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: investigations.saturating_add(POOL_HEADROOM),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// Load from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_MAX_CONNECTIONS` | `INVESTIGATION_MAX_CONCURRENT + 2` | Pool size |
    /// | `DATABASE_ACQUIRE_TIMEOUT_SECS` | `30` | Wait for a free connection |
    pub fn from_env() -> Self {
        let concurrency = std::env::var("INVESTIGATION_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(INVESTIGATION_MAX_CONCURRENT);
        let mut config = Self::for_concurrency(concurrency);

        if let Some(n) = std::env::var(ENV_DATABASE_MAX_CONNECTIONS)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            config.max_connections = n;
        }
        if let Some(secs) = std::env::var(ENV_DATABASE_ACQUIRE_TIMEOUT)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connect a pool with the given configuration.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}
