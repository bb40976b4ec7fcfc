//! Shared-container integration test harness, following
//! `packages/server/tests/common/harness.rs`'s `SharedTestInfra`/`OnceCell`
//! pattern: one Postgres container and one migration run per test binary,
//! truncated between tests instead of paying container startup cost per test.

use std::sync::Arc;

use anyhow::{Context, Result};
use autoscaler_core::common::{Clock, FakeClock};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

struct SharedTestInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

// Tests truncate shared tables between runs, so only one test may hold the
// database at a time; cargo test's default thread-per-test concurrency would
// otherwise interleave truncation with another test's assertions.
static TEST_LOCK: Mutex<()> = Mutex::const_new(());

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test handle: a fresh pool against the shared, truncated schema plus a
/// `FakeClock` pinned at a known instant so S1-S6 of §8 can advance time
/// deterministically instead of sleeping.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub clock: FakeClock,
    _lock: MutexGuard<'static, ()>,
}

impl TestHarness {
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    async fn truncate_all(pool: &PgPool) -> Result<()> {
        sqlx::query(
            "TRUNCATE TABLE finished_operations, pending_operations, assets, resources RESTART IDENTITY CASCADE",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        let lock = TEST_LOCK.lock().await;
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .expect("failed to connect to test database");
        Self::truncate_all(&db_pool)
            .await
            .expect("failed to truncate shared schema");

        Self {
            db_pool,
            clock: FakeClock::new(chrono::Utc::now()),
            _lock: lock,
        }
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
