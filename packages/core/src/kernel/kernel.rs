//! `AppKernel` — the dependency-injection container every job loop is
//! handed, mirroring `server_kernel.rs`'s `ServerKernel` (db pool plus the
//! set of external collaborators, constructed once at startup and passed
//! down by reference or `Arc`).

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::common::{Clock, SystemClock};
use crate::config::Config;
use crate::kernel::asset_manager::AssetManagerRegistry;

/// Holds every dependency the control-loop jobs need: the database pool,
/// the asset-manager dispatch table, the clock, and the resolved config.
pub struct AppKernel {
    pub db_pool: PgPool,
    pub asset_managers: AssetManagerRegistry,
    pub clock: Arc<dyn Clock>,
    pub config: Config,
}

impl AppKernel {
    /// Connects to `config.database_url` and builds a kernel with the real
    /// system clock and the given asset-manager registry.
    pub async fn connect(
        config: Config,
        asset_managers: AssetManagerRegistry,
    ) -> anyhow::Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            db_pool,
            asset_managers,
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Builds a kernel around an already-open pool, for tests.
    pub fn from_parts(
        db_pool: PgPool,
        asset_managers: AssetManagerRegistry,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            db_pool,
            asset_managers,
            clock,
            config,
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}
