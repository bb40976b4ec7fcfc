//! `Record` trait for CRUD operations against the control-plane schema.
//!
//! Mirrors the teacher's `kernel/jobs/record.rs` trait one-for-one; unlike
//! the teacher, most of our writes happen inside a caller-held transaction
//! (the whole point of §4.2-§4.4's claim-then-mutate pattern), so the trait
//! is generic over any `sqlx` executor rather than tied to a kernel struct.

use async_trait::async_trait;
use sqlx::{PgExecutor, Result};

/// Trait for database records with standard CRUD operations.
///
/// Implementors run their queries against whatever `PgExecutor` they're
/// handed — a bare `&PgPool` for read-only lookups, or a `&mut
/// Transaction<'_, Postgres>` when the row is part of a larger atomic claim.
#[async_trait]
pub trait Record: Sized + Send + Sync {
    /// The table name for this record type.
    const TABLE: &'static str;

    /// The id type for this record.
    type Id: Send + Sync;

    /// Find a record by its id.
    async fn find_by_id<'e, E>(id: Self::Id, executor: E) -> Result<Option<Self>>
    where
        E: PgExecutor<'e>;

    /// Insert a new record, returning the row as stored (with defaults filled in).
    async fn insert<'e, E>(&self, executor: E) -> Result<Self>
    where
        E: PgExecutor<'e>;

    /// Delete this record.
    async fn delete<'e, E>(&self, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>;
}
