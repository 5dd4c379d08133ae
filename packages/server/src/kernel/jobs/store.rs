//! Persistence contract for jobs and their append-only logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::job::{Job, JobKind, JobLogEntry, JobStatus, LogLevel, NewJob, StatusPatch};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for bulk selections over the whole table.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
}

/// Target of a bulk admin operation: either an explicit id list (a "page"
/// the operator is looking at) or everything matching a filter minus
/// explicit exclusions.
#[derive(Debug, Clone)]
pub enum BulkSelection {
    Page { ids: Vec<Uuid> },
    All { filter: JobFilter, exclude_ids: Vec<Uuid> },
}

/// Storage backend for jobs.
///
/// `transition` is the only way status is ever written. It enforces the
/// transition table and performs the write conditionally on the expected
/// current status, which is what makes concurrent claim races safe:
/// the loser observes `Ok(false)` and walks away.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, new_job: NewJob) -> StoreResult<Job>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Job>;

    /// Jobs of `kind` in `Request` whose `scheduled_at` has passed, ordered
    /// by priority then `scheduled_at`, limited to `limit`.
    async fn find_ready(&self, kind: JobKind, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Job>>;

    /// Count jobs in `status`, optionally restricted to one kind.
    async fn count_in_status(&self, kind: Option<JobKind>, status: JobStatus) -> StoreResult<i64>;

    async fn find_in_status(&self, status: JobStatus) -> StoreResult<Vec<Job>>;

    /// Completed jobs whose `delete_at` has passed and which actually have
    /// a published artifact to remove.
    async fn find_deletable(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>>;

    /// Conditionally move a job to `to`, applying `patch` in the same write.
    ///
    /// When `expected` is `Some`, the write only happens if the job still
    /// holds that status; a mismatch returns `Ok(false)` (lost race, not an
    /// error). A `(from, to)` pair outside the transition table returns
    /// `Err(IllegalTransition)`.
    async fn transition(
        &self,
        id: Uuid,
        expected: Option<JobStatus>,
        to: JobStatus,
        patch: StatusPatch,
    ) -> StoreResult<bool>;

    async fn append_log(&self, id: Uuid, level: LogLevel, message: &str) -> StoreResult<()>;

    /// Log lines for a job in append order.
    async fn logs(&self, id: Uuid) -> StoreResult<Vec<JobLogEntry>>;

    async fn bulk_select(&self, selection: &BulkSelection) -> StoreResult<Vec<Job>>;

    /// Remove the job record entirely. Returns whether a row existed.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}
