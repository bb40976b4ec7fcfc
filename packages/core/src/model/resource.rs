//! `Resource` — the configuration for all assets of one (scope, asset-type)
//! pair (§3).
//!
//! Sizes are modeled as `i64` rather than the spec's `uint64`: Postgres has
//! no native unsigned integer type, and the teacher's own integer columns
//! (`lease_duration_ms`, `timeout_ms` in `job.rs`) are `i64` throughout for
//! the same reason. Values are non-negative by invariant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{Id, MetricMap};
use crate::kernel::record::Record;

#[derive(FromRow, Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Resource {
    #[builder(default = Id::from_raw(0))]
    pub id: Id<Resource>,

    pub scope_uuid: Uuid,
    pub asset_type: String,

    #[builder(default)]
    pub low_threshold_percent: MetricMap,
    #[builder(default)]
    pub high_threshold_percent: MetricMap,
    #[builder(default)]
    pub critical_threshold_percent: MetricMap,
    #[builder(default)]
    pub low_delay_seconds: i64,
    #[builder(default)]
    pub high_delay_seconds: i64,

    #[builder(default = 20.0)]
    pub size_step_percent: f64,
    #[builder(default)]
    pub single_step: bool,

    #[builder(default, setter(strip_option))]
    pub min_size: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub max_size: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub min_free_size: Option<i64>,

    #[builder(default = Utc::now())]
    pub next_scrape_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub scrape_duration_secs: Option<f64>,
    #[builder(default, setter(strip_option))]
    pub scrape_error_message: Option<String>,
}

impl Resource {
    /// A resource usable directly as a target for `set_asset_size` etc. in
    /// unit tests that don't need a persisted row.
    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Resource::builder()
            .scope_uuid(Uuid::nil())
            .asset_type("volume".to_string())
            .build()
    }

    /// Resolves the per-scope size cap for `reason`, clamped against the
    /// resource's own `min_size`/`max_size` bounds (§4.1's "any per-scope
    /// cap"). This crate has no standalone per-scope override table, so the
    /// resource's own bounds are the only cap in force.
    pub fn size_bounds(&self) -> (Option<i64>, Option<i64>) {
        (self.min_size, self.max_size)
    }
}

#[async_trait]
impl Record for Resource {
    const TABLE: &'static str = "resources";
    type Id = Id<Resource>;

    async fn find_by_id<'e, E>(id: Id<Resource>, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, scope_uuid, asset_type,
                   low_threshold_percent, high_threshold_percent, critical_threshold_percent,
                   low_delay_seconds, high_delay_seconds,
                   size_step_percent, single_step,
                   min_size, max_size, min_free_size,
                   next_scrape_at, scrape_duration_secs, scrape_error_message
            FROM resources
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
            INSERT INTO resources (
                scope_uuid, asset_type,
                low_threshold_percent, high_threshold_percent, critical_threshold_percent,
                low_delay_seconds, high_delay_seconds,
                size_step_percent, single_step,
                min_size, max_size, min_free_size,
                next_scrape_at, scrape_duration_secs, scrape_error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id, scope_uuid, asset_type,
                      low_threshold_percent, high_threshold_percent, critical_threshold_percent,
                      low_delay_seconds, high_delay_seconds,
                      size_step_percent, single_step,
                      min_size, max_size, min_free_size,
                      next_scrape_at, scrape_duration_secs, scrape_error_message
            "#,
        )
        .bind(self.scope_uuid)
        .bind(&self.asset_type)
        .bind(&self.low_threshold_percent)
        .bind(&self.high_threshold_percent)
        .bind(&self.critical_threshold_percent)
        .bind(self.low_delay_seconds)
        .bind(self.high_delay_seconds)
        .bind(self.size_step_percent)
        .bind(self.single_step)
        .bind(self.min_size)
        .bind(self.max_size)
        .bind(self.min_free_size)
        .bind(self.next_scrape_at)
        .bind(self.scrape_duration_secs)
        .bind(&self.scrape_error_message)
        .fetch_one(executor)
        .await
    }

    async fn delete<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(self.id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

impl Resource {
    /// Claims the resource with the smallest `next_scrape_at <= now`, ties
    /// broken by id ascending (§4.2). Must run inside the caller's
    /// transaction so the row lock is held for the rest of the job.
    ///
    /// `now` is bound as a parameter rather than calling SQL `now()`: every
    /// timestamp this row's job writes comes from the injected `Clock`
    /// (§9), so the claim predicate must be driven by that same clock for a
    /// `FakeClock` advance to actually unlock the next due row.
    pub async fn claim_due<'e, E>(now: DateTime<Utc>, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, scope_uuid, asset_type,
                   low_threshold_percent, high_threshold_percent, critical_threshold_percent,
                   low_delay_seconds, high_delay_seconds,
                   size_step_percent, single_step,
                   min_size, max_size, min_free_size,
                   next_scrape_at, scrape_duration_secs, scrape_error_message
            FROM resources
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

    /// Persists the scheduling/error fields the scrape job mutates, without
    /// touching the resource's own configuration.
    pub async fn save_scrape_result<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE resources
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
