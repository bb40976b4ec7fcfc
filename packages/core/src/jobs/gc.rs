//! Garbage-collection job (§4.6 [FULL]): periodically trims
//! `finished_operations` by age. Unlike the other jobs this has no
//! per-row claim semantics, so it implements `Service` directly instead
//! of riding the discover/process harness.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::common::clock::jitter;
use crate::kernel::metrics::record_gc_deleted;
use crate::kernel::service::Service;
use crate::model::finished_operation::FinishedOperation;

pub struct GcJob {
    pool: PgPool,
    interval: Duration,
    retention: ChronoDuration,
}

impl GcJob {
    pub fn new(pool: PgPool, interval: Duration, retention: Duration) -> Self {
        Self {
            pool,
            interval,
            retention: ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::days(90)),
        }
    }

    async fn run_once(&self) -> anyhow::Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let deleted = FinishedOperation::delete_older_than(self.retention, &mut *conn).await?;
        Ok(deleted)
    }
}

#[async_trait]
impl Service for GcJob {
    fn name(&self) -> &'static str {
        "gc"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        debug!("gc loop starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(deleted) => {
                    if deleted > 0 {
                        info!(rows_deleted = deleted, "garbage-collected finished operations");
                    }
                    record_gc_deleted(deleted);
                }
                Err(err) => {
                    error!(error = %err, "gc sweep failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(jitter(self.interval)) => {}
            }
        }

        debug!("gc loop stopped");
        Ok(())
    }
}
