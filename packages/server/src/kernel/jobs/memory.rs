//! In-memory [`JobStore`] used by tests and local experiments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::job::{Job, JobKind, JobLogEntry, JobStatus, LogLevel, NewJob, StatusPatch};
use super::store::{BulkSelection, JobStore, StoreError, StoreResult};

/// HashMap-backed store implementing the same contract as the Postgres
/// backend, including the transition table and conditional writes.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    logs: RwLock<HashMap<Uuid, Vec<JobLogEntry>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, unordered. Test helper.
    pub fn all(&self) -> Vec<Job> {
        self.jobs.read().unwrap().values().cloned().collect()
    }
}

fn apply_patch(job: &mut Job, patch: &StatusPatch) {
    if let Some(t) = patch.started_at {
        job.started_at = Some(t);
    }
    if let Some(t) = patch.completed_at {
        job.completed_at = Some(t);
    }
    if let Some(msg) = &patch.result_msg {
        job.result_msg = Some(msg.clone());
    }
    if let Some(msg) = &patch.error_msg {
        job.error_msg = Some(msg.clone());
    }
    if let Some(t) = patch.delete_at {
        job.delete_at = Some(t);
    }
    if patch.clear_result {
        job.result_msg = None;
    }
    if patch.clear_error {
        job.error_msg = None;
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewJob) -> StoreResult<Job> {
        let job = Job::builder()
            .kind(new_job.kind)
            .payload(new_job.payload)
            .scheduled_at(new_job.scheduled_at)
            .priority(new_job.priority)
            .build();
        let job = Job {
            delete_at: new_job.delete_at,
            ..job
        };
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Job> {
        self.jobs
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_ready(&self, kind: JobKind, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Job>> {
        let mut ready: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.kind == kind && j.is_due(now))
            .cloned()
            .collect();
        ready.sort_by_key(|j| (j.priority.as_i16(), j.scheduled_at));
        ready.truncate(limit as usize);
        Ok(ready)
    }

    async fn count_in_status(&self, kind: Option<JobKind>, status: JobStatus) -> StoreResult<i64> {
        let count = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.status == status && kind.map_or(true, |k| j.kind == k))
            .count();
        Ok(count as i64)
    }

    async fn find_in_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.scheduled_at);
        Ok(jobs)
    }

    async fn find_deletable(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| {
                j.status == JobStatus::Completed
                    && j.result_msg.is_some()
                    && j.delete_at.is_some_and(|t| t <= now)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.delete_at);
        Ok(jobs)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: Option<JobStatus>,
        to: JobStatus,
        patch: StatusPatch,
    ) -> StoreResult<bool> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(expected) = expected {
            if job.status != expected {
                return Ok(false);
            }
        }
        if !JobStatus::can_transition(job.status, to) {
            return Err(StoreError::IllegalTransition { from: job.status, to });
        }

        job.status = to;
        apply_patch(job, &patch);
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn append_log(&self, id: Uuid, level: LogLevel, message: &str) -> StoreResult<()> {
        if !self.jobs.read().unwrap().contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.logs.write().unwrap().entry(id).or_default().push(JobLogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
        });
        Ok(())
    }

    async fn logs(&self, id: Uuid) -> StoreResult<Vec<JobLogEntry>> {
        Ok(self.logs.read().unwrap().get(&id).cloned().unwrap_or_default())
    }

    async fn bulk_select(&self, selection: &BulkSelection) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().unwrap();
        let selected = match selection {
            BulkSelection::Page { ids } => ids.iter().filter_map(|id| jobs.get(id).cloned()).collect(),
            BulkSelection::All { filter, exclude_ids } => {
                let mut selected: Vec<Job> = jobs
                    .values()
                    .filter(|j| {
                        filter.kind.map_or(true, |k| j.kind == k)
                            && filter.status.map_or(true, |s| j.status == s)
                            && !exclude_ids.contains(&j.id)
                    })
                    .cloned()
                    .collect();
                selected.sort_by_key(|j| j.scheduled_at);
                selected
            }
        };
        Ok(selected)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        self.logs.write().unwrap().remove(&id);
        Ok(self.jobs.write().unwrap().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::job::JobPriority;

    fn new_post_job() -> NewJob {
        NewJob::builder()
            .kind(JobKind::Post)
            .payload(serde_json::json!({
                "source_url": "https://example.org/p/1",
                "session_id": "s1"
            }))
            .build()
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = MemoryJobStore::new();
        let job = store.create(new_post_job()).await.unwrap();
        let found = store.find_by_id(job.id).await.unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.status, JobStatus::Request);
    }

    #[tokio::test]
    async fn find_ready_orders_by_priority_then_schedule() {
        let store = MemoryJobStore::new();
        let early = Utc::now() - chrono::Duration::hours(2);
        let late = Utc::now() - chrono::Duration::hours(1);

        let normal_late = store
            .create(NewJob::builder().kind(JobKind::Post).payload(serde_json::json!({})).scheduled_at(late).build())
            .await
            .unwrap();
        let normal_early = store
            .create(NewJob::builder().kind(JobKind::Post).payload(serde_json::json!({})).scheduled_at(early).build())
            .await
            .unwrap();
        let high_late = store
            .create(
                NewJob::builder()
                    .kind(JobKind::Post)
                    .payload(serde_json::json!({}))
                    .scheduled_at(late)
                    .priority(JobPriority::High)
                    .build(),
            )
            .await
            .unwrap();

        let ready = store.find_ready(JobKind::Post, Utc::now(), 10).await.unwrap();
        let ids: Vec<Uuid> = ready.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high_late.id, normal_early.id, normal_late.id]);
    }

    #[tokio::test]
    async fn transition_with_stale_expectation_is_a_no_op() {
        let store = MemoryJobStore::new();
        let job = store.create(new_post_job()).await.unwrap();

        let claimed = store
            .transition(job.id, Some(JobStatus::Request), JobStatus::Processing, StatusPatch::none())
            .await
            .unwrap();
        assert!(claimed);

        // A second claimant expecting Request loses cleanly.
        let claimed_again = store
            .transition(job.id, Some(JobStatus::Request), JobStatus::Processing, StatusPatch::none())
            .await
            .unwrap();
        assert!(!claimed_again);

        let found = store.find_by_id(job.id).await.unwrap();
        assert_eq!(found.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = MemoryJobStore::new();
        let job = store.create(new_post_job()).await.unwrap();

        let err = store
            .transition(job.id, None, JobStatus::Completed, StatusPatch::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::IllegalTransition { from: JobStatus::Request, to: JobStatus::Completed }
        ));
    }

    #[tokio::test]
    async fn retry_patch_clears_previous_outcome() {
        let store = MemoryJobStore::new();
        let job = store.create(new_post_job()).await.unwrap();
        store
            .transition(job.id, None, JobStatus::Processing, StatusPatch::none())
            .await
            .unwrap();
        store
            .transition(
                job.id,
                None,
                JobStatus::Failed,
                StatusPatch::builder().error_msg("boom").build(),
            )
            .await
            .unwrap();

        store
            .transition(
                job.id,
                Some(JobStatus::Failed),
                JobStatus::Request,
                StatusPatch::builder().clear_error(true).clear_result(true).build(),
            )
            .await
            .unwrap();

        let found = store.find_by_id(job.id).await.unwrap();
        assert_eq!(found.status, JobStatus::Request);
        assert!(found.error_msg.is_none());
        assert!(found.result_msg.is_none());
    }

    #[tokio::test]
    async fn deletable_requires_artifact_and_due_delete_at() {
        let store = MemoryJobStore::new();
        let past = Utc::now() - chrono::Duration::minutes(5);

        let with_artifact = store
            .create(NewJob::builder().kind(JobKind::Post).payload(serde_json::json!({})).delete_at(past).build())
            .await
            .unwrap();
        store
            .transition(with_artifact.id, None, JobStatus::Processing, StatusPatch::none())
            .await
            .unwrap();
        store
            .transition(
                with_artifact.id,
                None,
                JobStatus::Completed,
                StatusPatch::builder().result_msg("https://blog/p/9").build(),
            )
            .await
            .unwrap();

        let without_artifact = store
            .create(NewJob::builder().kind(JobKind::Post).payload(serde_json::json!({})).delete_at(past).build())
            .await
            .unwrap();
        store
            .transition(without_artifact.id, None, JobStatus::Processing, StatusPatch::none())
            .await
            .unwrap();
        store
            .transition(without_artifact.id, None, JobStatus::Completed, StatusPatch::none())
            .await
            .unwrap();

        let deletable = store.find_deletable(Utc::now()).await.unwrap();
        assert_eq!(deletable.len(), 1);
        assert_eq!(deletable[0].id, with_artifact.id);
    }

    #[tokio::test]
    async fn logs_are_append_ordered() {
        let store = MemoryJobStore::new();
        let job = store.create(new_post_job()).await.unwrap();
        store.append_log(job.id, LogLevel::Info, "first").await.unwrap();
        store.append_log(job.id, LogLevel::Warn, "second").await.unwrap();

        let logs = store.logs(job.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].message, "second");
    }

    #[tokio::test]
    async fn delete_removes_record_and_logs() {
        let store = MemoryJobStore::new();
        let job = store.create(new_post_job()).await.unwrap();
        store.append_log(job.id, LogLevel::Info, "x").await.unwrap();

        assert!(store.delete(job.id).await.unwrap());
        assert!(matches!(store.find_by_id(job.id).await, Err(StoreError::NotFound(_))));
        assert!(!store.delete(job.id).await.unwrap());
    }
}
