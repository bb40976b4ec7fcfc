//! Resize-execution job (§4.4): claims a greenlit pending operation and
//! asks the backend to carry it out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sqlx::{Postgres, Transaction};
use tracing::{error, warn};

use crate::common::Clock;
use crate::jobs::harness::JobKind;
use crate::kernel::asset_manager::{AssetManagerError, AssetManagerRegistry};
use crate::kernel::record::Record;
use crate::model::asset::Asset;
use crate::model::finished_operation::{FinishedOperation, Outcome};
use crate::model::pending_operation::PendingOperation;
use crate::model::resource::Resource;

pub struct ResizeExecutionJob {
    asset_managers: AssetManagerRegistry,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_retries: i32,
    retry_interval: ChronoDuration,
}

impl ResizeExecutionJob {
    pub fn new(
        asset_managers: AssetManagerRegistry,
        clock: Arc<dyn Clock>,
        interval: Duration,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            asset_managers,
            clock,
            interval,
            max_retries: max_retries as i32,
            retry_interval: ChronoDuration::from_std(retry_interval)
                .unwrap_or(ChronoDuration::seconds(300)),
        }
    }
}

#[async_trait]
impl JobKind for ResizeExecutionJob {
    type Item = PendingOperation;

    fn job_class(&self) -> &'static str {
        "resize_execution"
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn discover(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> anyhow::Result<Option<PendingOperation>> {
        Ok(PendingOperation::claim_and_delete_next(self.clock.now(), &mut *tx).await?)
    }

    async fn process(
        &self,
        operation: PendingOperation,
        mut tx: Transaction<'static, Postgres>,
    ) -> anyhow::Result<()> {
        let now = self.clock.now();

        let asset = Asset::find_by_id(operation.asset_id, &mut *tx)
            .await?
            .ok_or_else(|| anyhow::anyhow!("asset {} for pending operation is missing", operation.asset_id))?;
        let resource = Resource::find_by_id(asset.resource_id, &mut *tx)
            .await?
            .ok_or_else(|| anyhow::anyhow!("resource {} for asset {} is missing", asset.resource_id, asset.id))?;

        let manager = self.asset_managers.resolve(&resource.asset_type);
        let result = manager
            .set_asset_size(
                &resource,
                asset.uuid,
                operation.old_size.max(0) as u64,
                operation.new_size.max(0) as u64,
            )
            .await;

        match result {
            Ok(()) => {
                let mut asset = asset;
                asset.expected_size = Some(operation.new_size);
                asset.resized_at = Some(now);
                asset.save(&mut *tx).await?;

                let finished = FinishedOperation::from_pending(&operation, Outcome::Succeeded, None, now);
                finished.insert(&mut *tx).await?;
                tx.commit().await?;
                Ok(())
            }
            Err(AssetManagerError::UserError(message)) => {
                warn!(
                    operation_asset_id = %operation.asset_id,
                    error = %message,
                    "resize rejected by backend, not retrying"
                );
                let finished =
                    FinishedOperation::from_pending(&operation, Outcome::Failed, Some(message), now);
                finished.insert(&mut *tx).await?;
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                if operation.errored_attempts < self.max_retries {
                    let mut retry = operation.clone();
                    retry.errored_attempts += 1;
                    retry.retry_at = Some(now + self.retry_interval);
                    retry.insert(&mut *tx).await?;
                    tx.commit().await?;
                    error!(
                        operation_asset_id = %operation.asset_id,
                        attempt = retry.errored_attempts,
                        error = %err,
                        "resize attempt failed, will retry"
                    );
                    Err(err.into())
                } else {
                    let message = err.to_string();
                    let finished = FinishedOperation::from_pending(
                        &operation,
                        Outcome::Errored,
                        Some(message.clone()),
                        now,
                    );
                    finished.insert(&mut *tx).await?;
                    tx.commit().await?;
                    error!(
                        operation_asset_id = %operation.asset_id,
                        error = %message,
                        "resize attempt exhausted retries"
                    );
                    Ok(())
                }
            }
        }
    }
}
