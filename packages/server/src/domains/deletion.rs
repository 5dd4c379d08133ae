//! Deletion handler: remove the published artifact a completed job left
//! behind. Runs from the scheduler's deletion sweep.

use async_trait::async_trait;
use tracing::info;

use crate::common::AutomationError;
use crate::kernel::jobs::{DeletionHandler, Job};
use crate::kernel::traits::SessionMode;
use crate::kernel::ServerDeps;

pub struct ArtifactDeleter {
    deps: ServerDeps,
}

impl ArtifactDeleter {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl DeletionHandler for ArtifactDeleter {
    async fn delete_artifact(&self, job: &Job) -> Result<(), AutomationError> {
        // A completed job with no artifact has nothing to remove.
        let Some(artifact_url) = job.result_msg.as_deref() else {
            info!(job_id = %job.id, "no artifact recorded, nothing to delete");
            return Ok(());
        };

        let session_id = job
            .payload
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.deps.default_session_id)
            .to_string();

        let session = self
            .deps
            .browser
            .acquire(&session_id, self.deps.session_mode)
            .await?;

        let deleted = session.delete_post(artifact_url).await;
        if self.deps.session_mode == SessionMode::Exclusive {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "session close failed");
            }
        }
        deleted?;

        info!(job_id = %job.id, url = %artifact_url, "published artifact deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{JobKind, JobStatus, JobStore, NewJob, StatusPatch};
    use crate::kernel::test_dependencies::mock_deps;

    #[tokio::test]
    async fn deletes_the_recorded_artifact() {
        let test = mock_deps();
        let job = test
            .store
            .create(
                NewJob::builder()
                    .kind(JobKind::Post)
                    .payload(serde_json::json!({
                        "source_url": "https://source.example/p/1",
                        "session_id": "blog-profile"
                    }))
                    .build(),
            )
            .await
            .unwrap();
        test.store
            .transition(job.id, None, JobStatus::Processing, StatusPatch::none())
            .await
            .unwrap();
        test.store
            .transition(
                job.id,
                None,
                JobStatus::Completed,
                StatusPatch::builder().result_msg("https://blog.example/posts/3").build(),
            )
            .await
            .unwrap();
        let job = test.store.find_by_id(job.id).await.unwrap();

        ArtifactDeleter::new(test.deps.clone()).delete_artifact(&job).await.unwrap();

        assert_eq!(
            test.browser.handle.deletions(),
            vec!["https://blog.example/posts/3".to_string()]
        );
        // The payload's profile was used for the session.
        assert_eq!(test.browser.acquires()[0].0, "blog-profile");
    }

    #[tokio::test]
    async fn missing_artifact_is_a_quiet_success() {
        let test = mock_deps();
        let job = test
            .store
            .create(
                NewJob::builder()
                    .kind(JobKind::Post)
                    .payload(serde_json::json!({
                        "source_url": "https://source.example/p/1",
                        "session_id": "blog-profile"
                    }))
                    .build(),
            )
            .await
            .unwrap();

        ArtifactDeleter::new(test.deps.clone()).delete_artifact(&job).await.unwrap();
        assert!(test.browser.handle.deletions().is_empty());
        assert!(test.browser.acquires().is_empty());
    }
}
