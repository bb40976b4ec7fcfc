//! `Asset` — one cloud resource being managed (§3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{Id, MetricMap};
use crate::kernel::record::Record;
use crate::model::resource::Resource;

#[derive(FromRow, Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Asset {
    #[builder(default = Id::from_raw(0))]
    pub id: Id<Asset>,
    pub resource_id: Id<Resource>,
    pub uuid: Uuid,

    #[builder(default)]
    pub size: i64,
    #[builder(default)]
    pub usage: MetricMap,
    #[builder(default, setter(strip_option))]
    pub strict_minimum_size: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub strict_maximum_size: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub critical_usages: Option<String>,

    #[builder(default, setter(strip_option))]
    pub expected_size: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub resized_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub next_scrape_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub scrape_duration_secs: Option<f64>,
    #[builder(default, setter(strip_option))]
    pub scrape_error_message: Option<String>,
    #[builder(default = true)]
    pub never_scraped: bool,
}

impl Asset {
    /// Returns the metrics currently at or above `critical` thresholds,
    /// provided acting on them wouldn't exceed the asset's `max_size` (§4.3:
    /// "if bound would be violated, report none since we cannot act").
    pub fn recompute_critical_usages(
        &self,
        critical_threshold_percent: &MetricMap,
        max_size: Option<i64>,
    ) -> Option<String> {
        if let Some(max_size) = max_size {
            if self.size >= max_size {
                return None;
            }
        }

        let mut critical: Vec<&str> = critical_threshold_percent
            .iter()
            .filter(|(_, threshold)| **threshold > 0.0)
            .filter_map(|(metric, threshold)| {
                let usage_percent = self.usage.get(metric).copied().unwrap_or(0.0) * 100.0;
                (usage_percent >= *threshold).then_some(metric.as_str())
            })
            .collect();
        critical.sort_unstable();

        if critical.is_empty() {
            None
        } else {
            Some(critical.join(","))
        }
    }
}

#[async_trait]
impl Record for Asset {
    const TABLE: &'static str = "assets";
    type Id = Id<Asset>;

    async fn find_by_id<'e, E>(id: Id<Asset>, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, resource_id, uuid, size, usage,
                   strict_minimum_size, strict_maximum_size, critical_usages,
                   expected_size, resized_at,
                   next_scrape_at, scrape_duration_secs, scrape_error_message, never_scraped
            FROM assets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    async fn insert<'e, E>(&self, executor: E) -> sqlx::Result<Self>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO assets (
                resource_id, uuid, size, usage,
                strict_minimum_size, strict_maximum_size, critical_usages,
                expected_size, resized_at,
                next_scrape_at, scrape_duration_secs, scrape_error_message, never_scraped
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, resource_id, uuid, size, usage,
                      strict_minimum_size, strict_maximum_size, critical_usages,
                      expected_size, resized_at,
                      next_scrape_at, scrape_duration_secs, scrape_error_message, never_scraped
            "#,
        )
        .bind(self.resource_id)
        .bind(self.uuid)
        .bind(self.size)
        .bind(&self.usage)
        .bind(self.strict_minimum_size)
        .bind(self.strict_maximum_size)
        .bind(&self.critical_usages)
        .bind(self.expected_size)
        .bind(self.resized_at)
        .bind(self.next_scrape_at)
        .bind(self.scrape_duration_secs)
        .bind(&self.scrape_error_message)
        .bind(self.never_scraped)
        .fetch_one(executor)
        .await
    }

    async fn delete<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(self.id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

impl Asset {
    /// Claims the asset with the smallest `next_scrape_at <= now` (§4.3).
    ///
    /// `now` is bound as a parameter rather than calling SQL `now()`, so a
    /// `FakeClock` advance (§9) drives which row is due, matching the
    /// `next_scrape_at` the scrape job itself wrote from that same clock.
    pub async fn claim_due<'e, E>(now: DateTime<Utc>, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, resource_id, uuid, size, usage,
                   strict_minimum_size, strict_maximum_size, critical_usages,
                   expected_size, resized_at,
                   next_scrape_at, scrape_duration_secs, scrape_error_message, never_scraped
            FROM assets
            WHERE next_scrape_at <= $1
            ORDER BY next_scrape_at ASC, id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(executor)
        .await
    }

    /// Lists every asset row belonging to `resource_id`, for the
    /// resource-scrape job's symmetric-difference computation (§4.2).
    pub async fn list_for_resource<'e, E>(
        resource_id: Id<Resource>,
        executor: E,
    ) -> sqlx::Result<Vec<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, resource_id, uuid, size, usage,
                   strict_minimum_size, strict_maximum_size, critical_usages,
                   expected_size, resized_at,
                   next_scrape_at, scrape_duration_secs, scrape_error_message, never_scraped
            FROM assets
            WHERE resource_id = $1
            "#,
        )
        .bind(resource_id)
        .fetch_all(executor)
        .await
    }

    /// Persists the full row after an observation merge (§4.3): size,
    /// usage, resize tracking, critical usages and scheduling fields.
    pub async fn save<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE assets
            SET size = $2,
                usage = $3,
                strict_minimum_size = $4,
                strict_maximum_size = $5,
                critical_usages = $6,
                expected_size = $7,
                resized_at = $8,
                next_scrape_at = $9,
                scrape_duration_secs = $10,
                scrape_error_message = $11,
                never_scraped = $12
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(self.size)
        .bind(&self.usage)
        .bind(self.strict_minimum_size)
        .bind(self.strict_maximum_size)
        .bind(&self.critical_usages)
        .bind(self.expected_size)
        .bind(self.resized_at)
        .bind(self.next_scrape_at)
        .bind(self.scrape_duration_secs)
        .bind(&self.scrape_error_message)
        .bind(self.never_scraped)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Persists only scheduling/error fields (the stale-resize "still
    /// waiting" branch of §4.3 touches nothing else).
    pub async fn save_scrape_result<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE assets
            SET next_scrape_at = $2,
                scrape_duration_secs = $3,
                scrape_error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(self.next_scrape_at)
        .bind(self.scrape_duration_secs)
        .bind(&self.scrape_error_message)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset_with_usage(size: i64, metric: &str, usage_fraction: f64) -> Asset {
        Asset::builder()
            .resource_id(Id::from_raw(1))
            .uuid(Uuid::nil())
            .size(size)
            .usage(MetricMap::from_iter([(metric.to_string(), usage_fraction)]))
            .build()
    }

    #[test]
    fn critical_usages_empty_when_below_threshold() {
        let asset = asset_with_usage(1000, "space", 0.5);
        let thresholds = MetricMap::from_iter([("space".to_string(), 95.0)]);
        assert_eq!(asset.recompute_critical_usages(&thresholds, None), None);
    }

    #[test]
    fn critical_usages_lists_metrics_over_threshold() {
        let asset = asset_with_usage(1000, "space", 0.97);
        let thresholds = MetricMap::from_iter([("space".to_string(), 95.0)]);
        assert_eq!(
            asset.recompute_critical_usages(&thresholds, None),
            Some("space".to_string())
        );
    }

    #[test]
    fn critical_usages_none_when_already_at_max_size() {
        let asset = asset_with_usage(1000, "space", 0.99);
        let thresholds = MetricMap::from_iter([("space".to_string(), 95.0)]);
        assert_eq!(asset.recompute_critical_usages(&thresholds, Some(1000)), None);
    }
}
