//! PostgreSQL-backed [`JobStore`].
//!
//! Status is only ever written through `transition`, which performs a
//! conditional UPDATE (`WHERE id = $1 AND status = <current>`) so that two
//! concurrent claimants cannot both win. Job log lines live in a separate
//! append-only table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{Job, JobKind, JobLogEntry, JobStatus, LogLevel, NewJob, StatusPatch};
use super::store::{BulkSelection, JobStore, StoreError, StoreResult};

const JOB_COLUMNS: &str = "id, kind, status, priority, scheduled_at, started_at, completed_at, \
                           delete_at, result_msg, error_msg, payload, created_at, updated_at";

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, new_job: NewJob) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs (id, kind, status, priority, scheduled_at, delete_at, payload)
            VALUES ($1, $2, 'request', $3, $4, $5, $6)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new_job.kind)
        .bind(new_job.priority)
        .bind(new_job.scheduled_at)
        .bind(new_job.delete_at)
        .bind(new_job.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Job> {
        sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_ready(&self, kind: JobKind, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE kind = $1
              AND status = 'request'
              AND scheduled_at <= $2
            ORDER BY priority, scheduled_at ASC
            LIMIT $3
            "#
        ))
        .bind(kind)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn count_in_status(&self, kind: Option<JobKind>, status: JobStatus) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM jobs
            WHERE status = $1
              AND ($2::job_kind IS NULL OR kind = $2)
            "#,
        )
        .bind(status)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find_in_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY scheduled_at ASC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn find_deletable(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'completed'
              AND result_msg IS NOT NULL
              AND delete_at IS NOT NULL
              AND delete_at <= $1
            ORDER BY delete_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: Option<JobStatus>,
        to: JobStatus,
        patch: StatusPatch,
    ) -> StoreResult<bool> {
        // Read-then-conditional-write: the UPDATE still guards on the status
        // we read, so a concurrent writer in between makes this a no-op.
        let current: Option<JobStatus> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let current = current.ok_or(StoreError::NotFound(id))?;

        if let Some(expected) = expected {
            if current != expected {
                return Ok(false);
            }
        }
        if !JobStatus::can_transition(current, to) {
            return Err(StoreError::IllegalTransition { from: current, to });
        }

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                started_at = COALESCE($4, started_at),
                completed_at = COALESCE($5, completed_at),
                result_msg = CASE WHEN $8 THEN NULL ELSE COALESCE($6, result_msg) END,
                error_msg = CASE WHEN $9 THEN NULL ELSE COALESCE($7, error_msg) END,
                delete_at = COALESCE($10, delete_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(current)
        .bind(to)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(patch.result_msg)
        .bind(patch.error_msg)
        .bind(patch.clear_result)
        .bind(patch.clear_error)
        .bind(patch.delete_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_log(&self, id: Uuid, level: LogLevel, message: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO job_logs (job_id, level, message) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(level)
            .bind(message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn logs(&self, id: Uuid) -> StoreResult<Vec<JobLogEntry>> {
        let entries = sqlx::query_as::<_, JobLogEntry>(
            r#"
            SELECT timestamp, level, message
            FROM job_logs
            WHERE job_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn bulk_select(&self, selection: &BulkSelection) -> StoreResult<Vec<Job>> {
        let jobs = match selection {
            BulkSelection::Page { ids } => {
                sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ANY($1)"))
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await?
            }
            BulkSelection::All { filter, exclude_ids } => {
                sqlx::query_as::<_, Job>(&format!(
                    r#"
                    SELECT {JOB_COLUMNS}
                    FROM jobs
                    WHERE ($1::job_kind IS NULL OR kind = $1)
                      AND ($2::job_status IS NULL OR status = $2)
                      AND NOT (id = ANY($3))
                    ORDER BY scheduled_at ASC
                    "#
                ))
                .bind(filter.kind)
                .bind(filter.status)
                .bind(exclude_ids)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        // Log rows go with the job via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
