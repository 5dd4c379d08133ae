//! Processor traits the scheduler dispatches into.

use async_trait::async_trait;

use crate::common::AutomationError;

use super::job::{Job, JobKind};

/// A worker that knows how to execute one kind of job end to end.
///
/// `process` returns the result message persisted on success (for
/// publishing workflows, the artifact URL). All partial progress must be
/// communicated through the job log; a returned error moves the job to
/// Failed with the rendered message.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Extra gate on top of the kind match. Defaults to accepting every
    /// job of the processor's kind.
    fn can_process(&self, job: &Job) -> bool {
        job.kind == self.kind()
    }

    async fn process(&self, job: &Job) -> Result<String, AutomationError>;
}

/// Removes the external artifact a completed job published.
///
/// Must be idempotent: an artifact already gone counts as success, since
/// the deletion sweep may re-run after a crash.
#[async_trait]
pub trait DeletionHandler: Send + Sync {
    async fn delete_artifact(&self, job: &Job) -> Result<(), AutomationError>;
}
