//! Resource-scrape job (§4.2): keeps asset rows in sync with what actually
//! exists in a resource's scope.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::Clock;
use crate::jobs::harness::JobKind;
use crate::kernel::asset_manager::AssetManagerRegistry;
use crate::kernel::record::Record;
use crate::model::asset::Asset;
use crate::model::resource::Resource;

pub struct ResourceScrapeJob {
    asset_managers: AssetManagerRegistry,
    clock: std::sync::Arc<dyn Clock>,
    interval: Duration,
    log_scrapes: bool,
}

impl ResourceScrapeJob {
    pub fn new(
        asset_managers: AssetManagerRegistry,
        clock: std::sync::Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            asset_managers,
            clock,
            interval,
            log_scrapes: false,
        }
    }

    /// Enables per-scrape `info`-level logging of the listed assets
    /// (`CASTELLUM_LOG_SCRAPES`, §6).
    pub fn with_log_scrapes(mut self, log_scrapes: bool) -> Self {
        self.log_scrapes = log_scrapes;
        self
    }
}

#[async_trait]
impl JobKind for ResourceScrapeJob {
    type Item = Resource;

    fn job_class(&self) -> &'static str {
        "resource_scrape"
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn discover(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> anyhow::Result<Option<Resource>> {
        Ok(Resource::claim_due(self.clock.now(), &mut *tx).await?)
    }

    async fn process(
        &self,
        mut resource: Resource,
        mut tx: Transaction<'static, Postgres>,
    ) -> anyhow::Result<()> {
        let manager = self.asset_managers.resolve(&resource.asset_type);
        let now = self.clock.now();

        let observed = manager.list_assets(&resource).await;

        let observed_uuids = match observed {
            Ok(uuids) => uuids,
            Err(err) => {
                resource.scrape_error_message = Some(err.to_string());
                resource.next_scrape_at = now + crate::common::clock::jitter_delta(self.interval);
                resource.save_scrape_result(&mut *tx).await?;
                tx.commit().await?;
                return Err(err.into());
            }
        };

        if self.log_scrapes {
            info!(
                resource_id = %resource.id,
                asset_type = %resource.asset_type,
                observed_count = observed_uuids.len(),
                "resource scrape listed assets"
            );
        }

        let existing = Asset::list_for_resource(resource.id, &mut *tx).await?;
        let existing_by_uuid: std::collections::HashMap<Uuid, &Asset> =
            existing.iter().map(|asset| (asset.uuid, asset)).collect();
        let observed_set: HashSet<Uuid> = observed_uuids.into_iter().collect();

        for uuid in &observed_set {
            if !existing_by_uuid.contains_key(uuid) {
                let asset = Asset::builder()
                    .resource_id(resource.id)
                    .uuid(*uuid)
                    .next_scrape_at(now)
                    .never_scraped(true)
                    .build();
                asset.insert(&mut *tx).await?;
                debug!(resource_id = %resource.id, asset_uuid = %uuid, "discovered new asset");
            }
        }

        for asset in &existing {
            if !observed_set.contains(&asset.uuid) {
                asset.delete(&mut *tx).await?;
                debug!(resource_id = %resource.id, asset_uuid = %asset.uuid, "asset no longer exists, deleting");
            }
        }

        let finished_at = self.clock.now();
        resource.scrape_error_message = None;
        resource.next_scrape_at = finished_at + crate::common::clock::jitter_delta(self.interval);
        resource.scrape_duration_secs = Some((finished_at - now).num_milliseconds() as f64 / 1000.0);
        resource.save_scrape_result(&mut *tx).await?;
        tx.commit().await?;

        Ok(())
    }
}
