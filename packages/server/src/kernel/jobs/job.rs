//! Job model for background automation work.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::AutomationError;

// ============================================================================
// Enums
// ============================================================================

/// The closed set of job kinds. Exactly one kind-specific payload record is
/// attached to a job, selected by this discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Crawl a source post, derive keywords, link products, publish.
    Post,
    /// Generate and submit a comment on a target post.
    Comment,
    /// Product-first affiliate workflow: search, deep-link, compose, publish.
    Affiliate,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Post => "post",
            JobKind::Comment => "comment",
            JobKind::Affiliate => "affiliate",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
///
/// `Processing` and `DeleteProcessing` are transient-only: no job may be
/// observed holding them after an engine restart (the recovery sweep turns
/// them into `Failed`/`DeleteFailed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Parked; requires manual promotion before the scheduler considers it.
    Pending,
    /// Ready to be claimed once `scheduled_at` passes.
    #[default]
    Request,
    /// Claimed by the scheduler; a processor is running it right now.
    Processing,
    /// Finished; `result_msg` holds the published artifact locator.
    Completed,
    /// Aborted; `error_msg` explains why. Retry re-enters via `Request`.
    Failed,
    /// Deletion of the published artifact was requested.
    DeleteRequest,
    /// The deletion handler is running right now.
    DeleteProcessing,
    /// Deletion aborted; can be re-requested.
    DeleteFailed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::Request,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::DeleteRequest,
        JobStatus::DeleteProcessing,
        JobStatus::DeleteFailed,
    ];

    /// The single explicit transition table. Every status write in the
    /// system goes through this check; illegal transitions fail fast
    /// instead of silently succeeding.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            // Manual promotion and demotion.
            (Pending, Request) | (Request, Pending)
            // The normal run path.
            | (Request, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            // Retry is a full re-run through the claim path, never a
            // direct jump back into Processing.
            | (Failed, Request)
            // Deletion of a published artifact.
            | (Completed, DeleteRequest)
            | (Completed, DeleteProcessing)
            | (DeleteRequest, DeleteProcessing)
            | (DeleteProcessing, DeleteFailed)
            | (DeleteFailed, DeleteRequest)
        )
    }

    /// Statuses that must never survive a restart.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::DeleteProcessing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Convert to integer for efficient ordering (lower = higher priority).
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "log_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

// ============================================================================
// Job model
// ============================================================================

/// The central entity: a unit of schedulable, retryable work.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub kind: JobKind,

    #[builder(default)]
    pub status: JobStatus,
    #[builder(default)]
    pub priority: JobPriority,

    // Scheduling
    #[builder(default = Utc::now())]
    pub scheduled_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    /// For Post jobs: when the published artifact becomes eligible for the
    /// scheduled deletion sweep.
    #[builder(default, setter(strip_option))]
    pub delete_at: Option<DateTime<Utc>>,

    // Outcome
    #[builder(default, setter(strip_option))]
    pub result_msg: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_msg: Option<String>,

    /// Kind-specific payload, serialized. Exactly one payload shape per
    /// kind; processors deserialize with [`Job::payload_as`].
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Deserialize the kind-specific payload.
    ///
    /// A payload that no longer parses is a permanent problem with the job
    /// data, so the failure is terminal.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, AutomationError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            AutomationError::terminal(format!("job {} has a malformed {} payload: {e}", self.id, self.kind))
        })
    }

    /// Whether the scheduler should consider this job on a ready tick.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Request && self.scheduled_at <= now
    }
}

/// One append-only log line attached to a job. Never mutated or reordered.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

// ============================================================================
// Kind-specific payloads
// ============================================================================

/// Payload for [`JobKind::Post`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPayload {
    /// URL of the source post to crawl.
    pub source_url: String,
    /// Browser profile used to publish.
    pub session_id: String,
    /// Optional category on the target blog.
    #[serde(default)]
    pub category: Option<String>,
}

/// Payload for [`JobKind::Comment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentPayload {
    /// URL of the post to comment on.
    pub target_url: String,
    /// Browser profile used to submit the comment.
    pub session_id: String,
    /// Optional steer for the generated comment.
    #[serde(default)]
    pub topic_hint: Option<String>,
}

fn default_product_limit() -> u32 {
    10
}

/// Payload for [`JobKind::Affiliate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliatePayload {
    /// Product search keyword driving the workflow.
    pub keyword: String,
    /// Browser profile used to publish.
    pub session_id: String,
    #[serde(default = "default_product_limit")]
    pub product_limit: u32,
}

// ============================================================================
// Store inputs
// ============================================================================

/// Input for creating a job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    #[builder(default = Utc::now())]
    pub scheduled_at: DateTime<Utc>,
    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default, setter(strip_option))]
    pub delete_at: Option<DateTime<Utc>>,
}

/// Field updates applied together with a status transition.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct StatusPatch {
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub result_msg: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_msg: Option<String>,
    #[builder(default, setter(strip_option))]
    pub delete_at: Option<DateTime<Utc>>,
    /// Null out `result_msg` (a retry is a full re-run).
    #[builder(default)]
    pub clear_result: bool,
    /// Null out `error_msg`.
    #[builder(default)]
    pub clear_error: bool,
}

impl StatusPatch {
    /// A transition with no field changes.
    pub fn none() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(kind: JobKind) -> Job {
        Job::builder().kind(kind).build()
    }

    #[test]
    fn new_job_starts_in_request_with_normal_priority() {
        let job = sample_job(JobKind::Post);
        assert_eq!(job.status, JobStatus::Request);
        assert_eq!(job.priority, JobPriority::Normal);
    }

    #[test]
    fn due_job_has_request_status_and_past_schedule() {
        let job = sample_job(JobKind::Post);
        assert!(job.is_due(Utc::now()));

        let mut parked = sample_job(JobKind::Post);
        parked.status = JobStatus::Pending;
        assert!(!parked.is_due(Utc::now()));

        let mut future = sample_job(JobKind::Post);
        future.scheduled_at = Utc::now() + chrono::Duration::hours(1);
        assert!(!future.is_due(Utc::now()));
    }

    #[test]
    fn run_path_transitions_are_legal() {
        use JobStatus::*;
        assert!(JobStatus::can_transition(Pending, Request));
        assert!(JobStatus::can_transition(Request, Pending));
        assert!(JobStatus::can_transition(Request, Processing));
        assert!(JobStatus::can_transition(Processing, Completed));
        assert!(JobStatus::can_transition(Processing, Failed));
        assert!(JobStatus::can_transition(Failed, Request));
    }

    #[test]
    fn deletion_transitions_are_legal() {
        use JobStatus::*;
        assert!(JobStatus::can_transition(Completed, DeleteRequest));
        assert!(JobStatus::can_transition(Completed, DeleteProcessing));
        assert!(JobStatus::can_transition(DeleteRequest, DeleteProcessing));
        assert!(JobStatus::can_transition(DeleteProcessing, DeleteFailed));
        assert!(JobStatus::can_transition(DeleteFailed, DeleteRequest));
    }

    #[test]
    fn no_state_reaches_processing_without_passing_request() {
        use JobStatus::*;
        // Only Request may enter Processing; terminal states in particular
        // must re-enter through Request.
        for from in JobStatus::ALL {
            if from != Request {
                assert!(
                    !JobStatus::can_transition(from, Processing),
                    "{from:?} must not transition directly to Processing"
                );
            }
        }
    }

    #[test]
    fn completed_is_not_reentrant() {
        use JobStatus::*;
        assert!(!JobStatus::can_transition(Completed, Request));
        assert!(!JobStatus::can_transition(Completed, Failed));
        assert!(!JobStatus::can_transition(Failed, Completed));
    }

    #[test]
    fn in_flight_statuses_are_exactly_the_processing_pair() {
        for status in JobStatus::ALL {
            let expected = matches!(status, JobStatus::Processing | JobStatus::DeleteProcessing);
            assert_eq!(status.is_in_flight(), expected);
        }
    }

    #[test]
    fn priority_ordering_is_correct() {
        assert!(JobPriority::Critical.as_i16() < JobPriority::High.as_i16());
        assert!(JobPriority::High.as_i16() < JobPriority::Normal.as_i16());
        assert!(JobPriority::Normal.as_i16() < JobPriority::Low.as_i16());
    }

    #[test]
    fn payload_roundtrip_per_kind() {
        let payload = PostPayload {
            source_url: "https://example.org/post/1".into(),
            session_id: "blog-profile".into(),
            category: None,
        };
        let job = Job::builder()
            .kind(JobKind::Post)
            .payload(serde_json::to_value(&payload).unwrap())
            .build();

        let parsed: PostPayload = job.payload_as().unwrap();
        assert_eq!(parsed.source_url, payload.source_url);
    }

    #[test]
    fn malformed_payload_is_terminal() {
        let job = Job::builder()
            .kind(JobKind::Affiliate)
            .payload(serde_json::json!({ "wrong": true }))
            .build();

        let err = job.payload_as::<AffiliatePayload>().unwrap_err();
        assert!(matches!(err, AutomationError::Terminal(_)));
    }
}
