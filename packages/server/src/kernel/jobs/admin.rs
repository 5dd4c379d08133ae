//! Operator-facing job management: creation with validation, retries,
//! deletion requests, and Pending/Request parking, singly and in bulk.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::common::AutomationError;

use super::job::{
    AffiliatePayload, CommentPayload, Job, JobKind, JobStatus, LogLevel, NewJob, PostPayload, StatusPatch,
};
use super::store::{BulkSelection, JobStore, StoreResult};

/// Outcome of a bulk operation. `skipped` records every job the operation
/// did not apply to, with the status that disqualified it.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub affected: usize,
    pub skipped: Vec<(Uuid, JobStatus)>,
}

/// The precheck and the conditional write are separate reads; a job that
/// moves between them must not be reported as changed.
fn conflict(id: Uuid) -> AutomationError {
    AutomationError::Validation(format!("job {id} changed status concurrently; nothing was applied"))
}

pub struct JobAdmin {
    store: Arc<dyn JobStore>,
}

impl JobAdmin {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Create a job after validating the payload against its kind and the
    /// schedule fields against each other. Nothing is persisted on a
    /// validation failure.
    pub async fn create_job(&self, new_job: NewJob) -> Result<Job, AutomationError> {
        match new_job.kind {
            JobKind::Post => {
                serde_json::from_value::<PostPayload>(new_job.payload.clone())
                    .map_err(|e| AutomationError::Validation(format!("invalid post payload: {e}")))?;
            }
            JobKind::Comment => {
                serde_json::from_value::<CommentPayload>(new_job.payload.clone())
                    .map_err(|e| AutomationError::Validation(format!("invalid comment payload: {e}")))?;
            }
            JobKind::Affiliate => {
                serde_json::from_value::<AffiliatePayload>(new_job.payload.clone())
                    .map_err(|e| AutomationError::Validation(format!("invalid affiliate payload: {e}")))?;
            }
        }

        if let Some(delete_at) = new_job.delete_at {
            if delete_at < new_job.scheduled_at {
                return Err(AutomationError::Validation(
                    "delete_at must not precede scheduled_at".into(),
                ));
            }
        }

        let job = self.store.create(new_job).await?;
        info!(job_id = %job.id, kind = %job.kind, "job created");
        Ok(job)
    }

    /// Re-queue a failed job for a full re-run, clearing the previous
    /// outcome so no stale result or error survives.
    pub async fn retry_job(&self, id: Uuid) -> Result<Job, AutomationError> {
        let job = self.store.find_by_id(id).await?;
        if job.status != JobStatus::Failed {
            return Err(AutomationError::Validation(format!(
                "job {id} is {:?}, only failed jobs can be retried",
                job.status
            )));
        }

        let moved = self
            .store
            .transition(
                id,
                Some(JobStatus::Failed),
                JobStatus::Request,
                StatusPatch::builder()
                    .clear_error(true)
                    .clear_result(true)
                    .build(),
            )
            .await?;
        if !moved {
            return Err(conflict(id));
        }
        self.store.append_log(id, LogLevel::Info, "retry requested").await?;
        info!(job_id = %id, "job re-queued for retry");
        self.store.find_by_id(id).await.map_err(Into::into)
    }

    /// Retry every failed job in the selection. Jobs in any other status
    /// are reported as skipped, not errors.
    pub async fn retry_bulk(&self, selection: &BulkSelection) -> Result<BulkReport, AutomationError> {
        let mut report = BulkReport::default();
        for job in self.store.bulk_select(selection).await? {
            if job.status != JobStatus::Failed {
                report.skipped.push((job.id, job.status));
                continue;
            }
            let moved = self
                .store
                .transition(
                    job.id,
                    Some(JobStatus::Failed),
                    JobStatus::Request,
                    StatusPatch::builder().clear_error(true).clear_result(true).build(),
                )
                .await?;
            if moved {
                self.store.append_log(job.id, LogLevel::Info, "retry requested").await?;
                report.affected += 1;
            } else {
                report.skipped.push((job.id, job.status));
            }
        }
        info!(affected = report.affected, skipped = report.skipped.len(), "bulk retry finished");
        Ok(report)
    }

    /// Ask for the published artifact of a completed (or previously
    /// failed-to-delete) job to be removed by the deletion sweep.
    pub async fn request_delete(&self, id: Uuid) -> Result<Job, AutomationError> {
        let job = self.store.find_by_id(id).await?;
        let expected = match job.status {
            JobStatus::Completed => JobStatus::Completed,
            JobStatus::DeleteFailed => JobStatus::DeleteFailed,
            other => {
                return Err(AutomationError::Validation(format!(
                    "job {id} is {other:?}, only completed or delete_failed jobs can be delete-requested"
                )))
            }
        };

        let moved = self
            .store
            .transition(id, Some(expected), JobStatus::DeleteRequest, StatusPatch::none())
            .await?;
        if !moved {
            return Err(conflict(id));
        }
        self.store.append_log(id, LogLevel::Info, "deletion requested").await?;
        info!(job_id = %id, "deletion requested");
        self.store.find_by_id(id).await.map_err(Into::into)
    }

    /// Request deletion for every eligible job in the selection.
    pub async fn delete_bulk(&self, selection: &BulkSelection) -> Result<BulkReport, AutomationError> {
        let mut report = BulkReport::default();
        for job in self.store.bulk_select(selection).await? {
            let expected = match job.status {
                JobStatus::Completed => JobStatus::Completed,
                JobStatus::DeleteFailed => JobStatus::DeleteFailed,
                other => {
                    report.skipped.push((job.id, other));
                    continue;
                }
            };
            let moved = self
                .store
                .transition(job.id, Some(expected), JobStatus::DeleteRequest, StatusPatch::none())
                .await?;
            if moved {
                self.store.append_log(job.id, LogLevel::Info, "deletion requested").await?;
                report.affected += 1;
            } else {
                report.skipped.push((job.id, job.status));
            }
        }
        info!(affected = report.affected, skipped = report.skipped.len(), "bulk deletion request finished");
        Ok(report)
    }

    /// Move a parked job into the schedulable queue.
    pub async fn promote(&self, id: Uuid) -> Result<Job, AutomationError> {
        self.park_move(id, JobStatus::Pending, JobStatus::Request).await
    }

    /// Park a queued job so the scheduler stops considering it.
    pub async fn demote(&self, id: Uuid) -> Result<Job, AutomationError> {
        self.park_move(id, JobStatus::Request, JobStatus::Pending).await
    }

    async fn park_move(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<Job, AutomationError> {
        let job = self.store.find_by_id(id).await?;
        if job.status != from {
            return Err(AutomationError::Validation(format!(
                "job {id} is {:?}, expected {from:?}",
                job.status
            )));
        }
        let moved = self.store.transition(id, Some(from), to, StatusPatch::none()).await?;
        if !moved {
            return Err(conflict(id));
        }
        self.store.find_by_id(id).await.map_err(Into::into)
    }

    /// Log lines for a job, append-ordered.
    pub async fn job_logs(&self, id: Uuid) -> StoreResult<Vec<super::job::JobLogEntry>> {
        self.store.logs(id).await
    }
}
