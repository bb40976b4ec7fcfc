//! Asset-scrape job (§4.3): the heart of the reconciliation loop. Refreshes
//! one asset's observed status, tracks recently completed resizes, and
//! advances its pending operation (if any) through the state machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::info;

use crate::common::{Clock, MetricMap};
use crate::jobs::harness::JobKind;
use crate::kernel::asset_manager::{AssetManagerError, AssetManagerRegistry, AssetStatus};
use crate::kernel::record::Record;
use crate::model::asset::Asset;
use crate::model::finished_operation::{FinishedOperation, Outcome};
use crate::model::pending_operation::PendingOperation;
use crate::model::reason::Reason;
use crate::model::resource::Resource;
use crate::scaling::eligible_operations;

pub struct AssetScrapeJob {
    asset_managers: AssetManagerRegistry,
    clock: Arc<dyn Clock>,
    interval: Duration,
    stale_resize_window: chrono::Duration,
    log_scrapes: bool,
}

impl AssetScrapeJob {
    pub fn new(
        asset_managers: AssetManagerRegistry,
        clock: Arc<dyn Clock>,
        interval: Duration,
        stale_resize_window: Duration,
    ) -> Self {
        Self {
            asset_managers,
            clock,
            interval,
            stale_resize_window: chrono::Duration::from_std(stale_resize_window)
                .unwrap_or(chrono::Duration::hours(1)),
            log_scrapes: false,
        }
    }

    /// Enables per-scrape `info`-level logging of the observed status
    /// (`CASTELLUM_LOG_SCRAPES`, §6).
    pub fn with_log_scrapes(mut self, log_scrapes: bool) -> Self {
        self.log_scrapes = log_scrapes;
        self
    }
}

#[async_trait]
impl JobKind for AssetScrapeJob {
    type Item = Asset;

    fn job_class(&self) -> &'static str {
        "asset_scrape"
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn discover(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> anyhow::Result<Option<Asset>> {
        Ok(Asset::claim_due(self.clock.now(), &mut *tx).await?)
    }

    async fn process(
        &self,
        mut asset: Asset,
        mut tx: Transaction<'static, Postgres>,
    ) -> anyhow::Result<()> {
        let started_at = self.clock.now();

        let resource = Resource::find_by_id(asset.resource_id, &mut *tx)
            .await?
            .ok_or_else(|| anyhow::anyhow!("resource {} for asset {} is missing", asset.resource_id, asset.id))?;
        let pending = PendingOperation::find_by_asset_id(asset.id, &mut *tx).await?;

        let manager = self.asset_managers.resolve(&resource.asset_type);
        let previous = previous_status(&asset);

        let observed = manager.get_asset_status(&resource, asset.uuid, previous.as_ref()).await;

        let status = match observed {
            Ok(status) => {
                if self.log_scrapes {
                    info!(
                        asset_id = %asset.id,
                        asset_uuid = %asset.uuid,
                        size = status.size,
                        usage = ?status.usage,
                        "asset scrape observed status"
                    );
                }
                status
            }
            Err(AssetManagerError::AssetNotFound(uuid)) => {
                info!(asset_id = %asset.id, asset_uuid = %uuid, "asset no longer exists, deleting");
                asset.delete(&mut *tx).await?;
                tx.commit().await?;
                return Ok(());
            }
            Err(err) => {
                asset.scrape_error_message = Some(err.to_string());
                asset.next_scrape_at =
                    started_at + crate::common::clock::jitter_delta(self.interval);
                asset.save_scrape_result(&mut *tx).await?;
                tx.commit().await?;
                return Err(err.into());
            }
        };

        let merge = merge_observation(&asset, &status, started_at, self.stale_resize_window);

        if merge == MergeOutcome::StillWaiting {
            let finished_at = self.clock.now();
            asset.scrape_error_message = None;
            asset.next_scrape_at = finished_at + crate::common::clock::jitter_delta(self.interval);
            asset.scrape_duration_secs =
                Some((finished_at - started_at).num_milliseconds() as f64 / 1000.0);
            asset.save_scrape_result(&mut *tx).await?;
            tx.commit().await?;
            return Ok(());
        }

        asset.size = status.size as i64;
        asset.usage = MetricMap::from_iter(status.usage.clone());
        asset.strict_minimum_size = status.strict_minimum_size.map(|v| v as i64);
        asset.strict_maximum_size = status.strict_maximum_size.map(|v| v as i64);
        if matches!(merge, MergeOutcome::AcceptedClearTracking | MergeOutcome::GaveUp) {
            asset.expected_size = None;
            asset.resized_at = None;
        }
        asset.critical_usages =
            asset.recompute_critical_usages(&resource.critical_threshold_percent, resource.max_size);

        advance_operation(&resource, &asset, pending, self.clock.now(), &mut tx).await?;

        let finished_at = self.clock.now();
        asset.scrape_error_message = None;
        asset.next_scrape_at = finished_at + crate::common::clock::jitter_delta(self.interval);
        asset.scrape_duration_secs = Some((finished_at - started_at).num_milliseconds() as f64 / 1000.0);
        asset.never_scraped = false;
        asset.save(&mut *tx).await?;
        tx.commit().await?;

        Ok(())
    }
}

fn previous_status(asset: &Asset) -> Option<AssetStatus> {
    if asset.never_scraped {
        return None;
    }
    Some(AssetStatus {
        size: asset.size.max(0) as u64,
        usage: asset.usage.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        strict_minimum_size: asset.strict_minimum_size.map(|v| v.max(0) as u64),
        strict_maximum_size: asset.strict_maximum_size.map(|v| v.max(0) as u64),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeOutcome {
    /// Case 1: no resize tracked, nothing to clear.
    Accepted,
    /// Cases 2 and 3: accept the observation and clear resize tracking.
    AcceptedClearTracking,
    /// Case 4, window expired: accept and clear tracking like case 2/3.
    GaveUp,
    /// Case 4, still within the window: skip the operation-advance stage.
    StillWaiting,
}

/// Implements §4.3's four-way observation merge.
fn merge_observation(
    asset: &Asset,
    observed: &AssetStatus,
    now: DateTime<Utc>,
    stale_resize_window: chrono::Duration,
) -> MergeOutcome {
    let Some(expected_size) = asset.expected_size else {
        return MergeOutcome::Accepted;
    };

    if expected_size == observed.size as i64 {
        return MergeOutcome::AcceptedClearTracking;
    }

    if asset.size != observed.size as i64 {
        return MergeOutcome::AcceptedClearTracking;
    }

    let resized_at = asset.resized_at.unwrap_or(now);
    if now - resized_at >= stale_resize_window {
        MergeOutcome::GaveUp
    } else {
        MergeOutcome::StillWaiting
    }
}

fn delay_seconds_for(resource: &Resource, reason: Reason) -> i64 {
    match reason {
        Reason::Critical => 0,
        Reason::High => resource.high_delay_seconds,
        Reason::Low => resource.low_delay_seconds,
    }
}

/// Operation-advance stage (§4.3): cancel, update, confirm, or create.
async fn advance_operation<'e>(
    resource: &Resource,
    asset: &Asset,
    pending: Option<PendingOperation>,
    now: DateTime<Utc>,
    tx: &mut Transaction<'e, Postgres>,
) -> anyhow::Result<()> {
    if let Some(op) = &pending {
        if op.is_greenlit_at_or_before(now) {
            return Ok(());
        }
    }

    let eligible = eligible_operations(resource, asset);
    let mut remaining = None;

    if let Some(mut op) = pending {
        let still_eligible = eligible.contains_key(&op.reason);
        let critical_overrides_high =
            op.reason == Reason::High && eligible.contains_key(&Reason::Critical);

        if !still_eligible || critical_overrides_high {
            op.delete(&mut *tx).await?;
            let finished = FinishedOperation::from_pending(&op, Outcome::Cancelled, None, now);
            finished.insert(&mut *tx).await?;
        } else {
            if let Some(&new_size) = eligible.get(&op.reason) {
                if new_size != op.new_size {
                    op.new_size = new_size;
                    op.update_new_size(&mut *tx).await?;
                }
            }
            if op.confirmed_at.is_none() {
                let delay = chrono::Duration::seconds(delay_seconds_for(resource, op.reason));
                if now >= op.created_at + delay {
                    op.confirm(now);
                    op.save_confirmation(&mut *tx).await?;
                }
            }
            remaining = Some(op);
        }
    }

    if remaining.is_none() {
        if let Some((&reason, &new_size)) = eligible.iter().next() {
            let mut new_op = PendingOperation::builder()
                .asset_id(asset.id)
                .reason(reason)
                .old_size(asset.size)
                .new_size(new_size)
                .usage(asset.usage.clone())
                .created_at(now)
                .build();
            new_op.auto_confirm_if_critical();
            new_op.insert(&mut *tx).await?;
        }
    }

    Ok(())
}
