//! `PendingOperation` — a proposed resize not yet executed or cancelled (§3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{Id, MetricMap};
use crate::kernel::record::Record;
use crate::model::asset::Asset;
use crate::model::reason::Reason;

#[derive(FromRow, Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct PendingOperation {
    #[builder(default = Id::from_raw(0))]
    pub id: Id<PendingOperation>,
    pub asset_id: Id<Asset>,

    pub reason: Reason,
    pub old_size: i64,
    pub new_size: i64,
    #[builder(default)]
    pub usage: MetricMap,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub greenlit_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub greenlit_by_user_uuid: Option<Uuid>,

    #[builder(default)]
    pub errored_attempts: i32,
    #[builder(default, setter(strip_option))]
    pub retry_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// Whether this operation is greenlit for execution at or before `now`
    /// — the asset-scrape job must never touch such a row (§4.3: "a worker
    /// may be executing it").
    pub fn is_greenlit_at_or_before(&self, now: DateTime<Utc>) -> bool {
        self.greenlit_at.is_some_and(|at| at <= now)
    }

    /// Sets `confirmed_at` and `greenlit_at` atomically to the same instant
    /// (§3: "currently equal"; §9's open question notes a future approval
    /// hook could withhold `greenlit_at` separately, but no caller does
    /// today, so a single write keeps the invariant trivially true).
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.confirmed_at = Some(now);
        self.greenlit_at = Some(now);
    }

    /// Auto-confirms and auto-greenlights a `critical` operation at
    /// creation time (§3: `reason = critical ⇒ confirmed_at = greenlit_at =
    /// created_at`).
    pub fn auto_confirm_if_critical(&mut self) {
        if self.reason == Reason::Critical {
            self.confirmed_at = Some(self.created_at);
            self.greenlit_at = Some(self.created_at);
        }
    }
}

#[async_trait]
impl Record for PendingOperation {
    const TABLE: &'static str = "pending_operations";
    type Id = Id<PendingOperation>;

    async fn find_by_id<'e, E>(id: Id<PendingOperation>, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, asset_id, reason, old_size, new_size, usage,
                   created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid,
                   errored_attempts, retry_at
            FROM pending_operations
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
            INSERT INTO pending_operations (
                asset_id, reason, old_size, new_size, usage,
                created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid,
                errored_attempts, retry_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, asset_id, reason, old_size, new_size, usage,
                      created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid,
                      errored_attempts, retry_at
            "#,
        )
        .bind(self.asset_id)
        .bind(self.reason)
        .bind(self.old_size)
        .bind(self.new_size)
        .bind(&self.usage)
        .bind(self.created_at)
        .bind(self.confirmed_at)
        .bind(self.greenlit_at)
        .bind(self.greenlit_by_user_uuid)
        .bind(self.errored_attempts)
        .bind(self.retry_at)
        .fetch_one(executor)
        .await
    }

    async fn delete<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("DELETE FROM pending_operations WHERE id = $1")
            .bind(self.id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

impl PendingOperation {
    /// Loads the single pending operation attached to `asset_id`, if any
    /// (unique on `asset_id` per §3).
    pub async fn find_by_asset_id<'e, E>(
        asset_id: Id<Asset>,
        executor: E,
    ) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, asset_id, reason, old_size, new_size, usage,
                   created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid,
                   errored_attempts, retry_at
            FROM pending_operations
            WHERE asset_id = $1
            "#,
        )
        .bind(asset_id)
        .fetch_optional(executor)
        .await
    }

    /// Updates only `new_size` (§4.3's "maybe-update": "Do not change
    /// timestamps").
    pub async fn update_new_size<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE pending_operations SET new_size = $2 WHERE id = $1")
            .bind(self.id)
            .bind(self.new_size)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Persists `confirmed_at`/`greenlit_at` after `confirm()` is called.
    pub async fn save_confirmation<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "UPDATE pending_operations SET confirmed_at = $2, greenlit_at = $3 WHERE id = $1",
        )
        .bind(self.id)
        .bind(self.confirmed_at)
        .bind(self.greenlit_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Atomically claims and removes the next eligible greenlit operation,
    /// ordered by reason priority then id (§4.4). `FOR UPDATE SKIP LOCKED`
    /// inside the `DELETE ... WHERE id = (SELECT ...)` subquery gives
    /// at-most-once dispatch across concurrent workers.
    ///
    /// `now` is bound as a parameter rather than calling SQL `now()`:
    /// `greenlit_at` and `retry_at` are both written from the injected
    /// `Clock` (§9), so the same clock must gate this claim for a
    /// `FakeClock` advance to make a retried operation dispatchable.
    pub async fn claim_and_delete_next<'e, E>(
        now: DateTime<Utc>,
        executor: E,
    ) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            DELETE FROM pending_operations WHERE id = (
                SELECT id FROM pending_operations
                WHERE greenlit_at <= $1
                  AND (retry_at IS NULL OR retry_at <= $1)
                ORDER BY reason ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, asset_id, reason, old_size, new_size, usage,
                      created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid,
                      errored_attempts, retry_at
            "#,
        )
        .bind(now)
        .fetch_optional(executor)
        .await
    }
}
