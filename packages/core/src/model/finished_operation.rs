//! `FinishedOperation` — append-only history of terminal operations (§3).
//!
//! Deliberately has no primary key: it's a pure append log, and the garbage
//! collector (§4.6) deletes purely by `finished_at`, never by identity.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

use crate::common::{Id, MetricMap};
use crate::model::asset::Asset;
use crate::model::pending_operation::PendingOperation;
use crate::model::reason::Reason;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "operation_outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
    Errored,
}

#[derive(FromRow, Debug, Clone)]
pub struct FinishedOperation {
    pub asset_id: Id<Asset>,
    pub reason: Reason,
    pub old_size: i64,
    pub new_size: i64,
    pub usage: MetricMap,

    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub greenlit_at: Option<DateTime<Utc>>,
    pub greenlit_by_user_uuid: Option<Uuid>,

    pub errored_attempts: i32,
    pub retry_at: Option<DateTime<Utc>>,

    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub error_message: Option<String>,
}

impl FinishedOperation {
    /// Builds the finished record for a pending operation reaching a
    /// terminal state, carrying every field of its source row (§3).
    pub fn from_pending(
        operation: &PendingOperation,
        outcome: Outcome,
        error_message: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            asset_id: operation.asset_id,
            reason: operation.reason,
            old_size: operation.old_size,
            new_size: operation.new_size,
            usage: operation.usage.clone(),
            created_at: operation.created_at,
            confirmed_at: operation.confirmed_at,
            greenlit_at: operation.greenlit_at,
            greenlit_by_user_uuid: operation.greenlit_by_user_uuid,
            errored_attempts: operation.errored_attempts,
            retry_at: operation.retry_at,
            finished_at,
            outcome,
            error_message,
        }
    }

    pub async fn insert<'e, E>(&self, executor: E) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO finished_operations (
                asset_id, reason, old_size, new_size, usage,
                created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid,
                errored_attempts, retry_at,
                finished_at, outcome, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
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
        .bind(self.finished_at)
        .bind(self.outcome)
        .bind(&self.error_message)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Deletes every row older than `retention` (§4.6). Returns the number
    /// of rows removed.
    pub async fn delete_older_than<'e, E>(retention: Duration, executor: E) -> sqlx::Result<u64>
    where
        E: PgExecutor<'e>,
    {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query("DELETE FROM finished_operations WHERE finished_at < $1")
            .bind(cutoff)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pending_carries_every_source_field() {
        let operation = PendingOperation::builder()
            .asset_id(Id::from_raw(7))
            .reason(Reason::High)
            .old_size(1000i64)
            .new_size(1200i64)
            .errored_attempts(2i32)
            .build();

        let finished_at = Utc::now();
        let finished = FinishedOperation::from_pending(
            &operation,
            Outcome::Succeeded,
            None,
            finished_at,
        );

        assert_eq!(finished.asset_id, operation.asset_id);
        assert_eq!(finished.old_size, operation.old_size);
        assert_eq!(finished.new_size, operation.new_size);
        assert_eq!(finished.errored_attempts, 2);
        assert_eq!(finished.finished_at, finished_at);
        assert_eq!(finished.outcome, Outcome::Succeeded);
    }
}
