//! Generic job-loop supervisor (§4.5).
//!
//! Each iteration opens a transaction, runs a job's `discover` (which must
//! use `FOR UPDATE SKIP LOCKED`), and on success hands the claimed row and
//! the same transaction to `process`, which commits it. On "no rows" the
//! transaction rolls back and the loop sleeps with jitter until the next
//! poll or cancellation. Grounded on `kernel/jobs/runner.rs`'s `JobRunner::run`
//! loop shape (claim / sleep-on-empty / sleep-on-error, `CancellationToken`
//! aware), generalized from a single fixed job queue to any `(discover,
//! process)` pair since each of our three jobs claims a different table.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::common::clock::jitter;
use crate::kernel::metrics::{record_duration, record_outcome, Outcome as MetricOutcome};
use crate::kernel::service::Service;

/// One job class: how to claim the next row and how to act on it.
#[async_trait]
pub trait JobKind: Send + Sync {
    type Item: Send;

    /// Short label used for logs and metrics (`resource_scrape`, `asset_scrape`, …).
    fn job_class(&self) -> &'static str;

    /// How long to sleep (before jitter) when nothing was claimed.
    fn poll_interval(&self) -> Duration;

    /// Claims the next eligible row inside `tx`. `Ok(None)` means no work is
    /// currently due; the harness rolls back and sleeps.
    async fn discover(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> anyhow::Result<Option<Self::Item>>;

    /// Acts on the claimed row. Must commit `tx` itself; an `Err` return
    /// drops `tx` uncommitted, which rolls it back.
    async fn process(&self, item: Self::Item, tx: Transaction<'static, Postgres>)
        -> anyhow::Result<()>;
}

/// Drives a single `JobKind` in a polling loop until cancelled.
pub struct JobLoop<J: JobKind> {
    pool: PgPool,
    job: J,
}

impl<J: JobKind + 'static> JobLoop<J> {
    pub fn new(pool: PgPool, job: J) -> Self {
        Self { pool, job }
    }

    /// Runs one discover/process cycle. Returns whether a row was claimed.
    async fn run_iteration(&self) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        let item = self.job.discover(&mut tx).await?;
        match item {
            None => {
                tx.rollback().await?;
                Ok(false)
            }
            Some(item) => {
                let start = Instant::now();
                self.job.process(item, tx).await?;
                record_duration(self.job.job_class(), start.elapsed());
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl<J: JobKind + 'static> Service for JobLoop<J> {
    fn name(&self) -> &'static str {
        self.job.job_class()
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        debug!(job_class = self.job.job_class(), "job loop starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_iteration().await {
                Ok(true) => {
                    record_outcome(self.job.job_class(), MetricOutcome::Claimed);
                }
                Ok(false) => {
                    record_outcome(self.job.job_class(), MetricOutcome::Empty);
                    if !sleep_or_cancel(&shutdown, jitter(self.job.poll_interval())).await {
                        break;
                    }
                }
                Err(err) => {
                    record_outcome(self.job.job_class(), MetricOutcome::Error);
                    error!(job_class = self.job.job_class(), error = %err, "job iteration failed");
                    if !sleep_or_cancel(&shutdown, jitter(self.job.poll_interval())).await {
                        break;
                    }
                }
            }
        }

        debug!(job_class = self.job.job_class(), "job loop stopped");
        Ok(())
    }
}

/// Sleeps for `duration` unless cancelled first. Returns `false` if
/// cancellation won the race, so the caller should exit its loop.
async fn sleep_or_cancel(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
