//! Comment workflow: generate a short comment for a target post and
//! submit it through a shared browser session.
//!
//! Rendered as a conveyor pipeline like the other workflows, so transient
//! failures retry per step and an abort carries the failing step's name.
//! Comment jobs always run in Reuse mode: the profile stays logged in
//! across jobs, single-flight scheduling guarantees no two comment jobs
//! touch the shared session at once, and pooled sessions are never closed
//! here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor::{Backoff, Pipeline, RetryPolicy, Step};
use tracing::info;

use crate::common::AutomationError;
use crate::kernel::jobs::{CommentPayload, Job, JobKind, JobProcessor};
use crate::kernel::traits::{BrowserHandle, CrawledPost, SessionMode};
use crate::kernel::ServerDeps;

pub struct CommentProcessor {
    deps: ServerDeps,
}

impl CommentProcessor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

/// State threaded through the comment pipeline.
struct CommentRunState {
    deps: ServerDeps,
    payload: CommentPayload,
    session: Option<Arc<dyn BrowserHandle>>,
    post: Option<CrawledPost>,
    comment: Option<String>,
}

fn transient_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), 3, Backoff::Exponential)
}

fn missing(step: &str) -> AutomationError {
    AutomationError::terminal(format!("pipeline state missing before '{step}'"))
}

async fn acquire_session(s: &mut CommentRunState) -> Result<(), AutomationError> {
    let session = s
        .deps
        .browser
        .acquire(&s.payload.session_id, SessionMode::Reuse)
        .await?;
    s.session = Some(session);
    Ok(())
}

async fn fetch_target(s: &mut CommentRunState) -> Result<(), AutomationError> {
    let session = s.session.as_ref().ok_or_else(|| missing("fetch_target"))?;
    s.post = Some(session.fetch_post(&s.payload.target_url).await?);
    Ok(())
}

async fn generate_comment(s: &mut CommentRunState) -> Result<(), AutomationError> {
    let post = s.post.as_ref().ok_or_else(|| missing("generate_comment"))?;

    let hint = s
        .payload
        .topic_hint
        .as_deref()
        .map(|h| format!("Angle to take: {h}\n\n"))
        .unwrap_or_default();
    let prompt = format!(
        "Write a short, natural reader comment for this blog post. \
         Two or three sentences, no greeting, no signature.\n\n{hint}Title: {}\n\n{}",
        post.title, post.body
    );
    let comment = s.deps.generator.generate(&prompt).await?;
    let comment = comment.trim();
    if comment.is_empty() {
        return Err(AutomationError::transient("generator returned an empty comment"));
    }

    s.comment = Some(comment.to_string());
    Ok(())
}

async fn submit(s: &mut CommentRunState) -> Result<(), AutomationError> {
    let session = s.session.as_ref().ok_or_else(|| missing("submit"))?;
    let comment = s.comment.as_ref().ok_or_else(|| missing("submit"))?;

    session.submit_comment(&s.payload.target_url, comment).await?;
    info!(target = %s.payload.target_url, "comment submitted");
    Ok(())
}

fn build_pipeline() -> Pipeline<CommentRunState, AutomationError> {
    Pipeline::new()
        .step(
            Step::new("acquire_session", |s: &mut CommentRunState| {
                Box::pin(acquire_session(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("fetch_target", |s: &mut CommentRunState| Box::pin(fetch_target(s)))
                .with_retry(transient_policy()),
        )
        .step(
            Step::new("generate_comment", |s: &mut CommentRunState| {
                Box::pin(generate_comment(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("submit", |s: &mut CommentRunState| Box::pin(submit(s)))
                .with_retry(transient_policy()),
        )
}

#[async_trait]
impl JobProcessor for CommentProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Comment
    }

    async fn process(&self, job: &Job) -> Result<String, AutomationError> {
        let payload: CommentPayload = job.payload_as()?;
        let target_url = payload.target_url.clone();

        let mut state = CommentRunState {
            deps: self.deps.clone(),
            payload,
            session: None,
            post: None,
            comment: None,
        };

        build_pipeline()
            .run(&mut state)
            .await
            .map_err(AutomationError::from_pipeline)?;

        Ok(format!("commented on {target_url}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{JobStore, NewJob};
    use crate::kernel::test_dependencies::mock_deps;

    fn comment_job(payload: serde_json::Value) -> NewJob {
        NewJob::builder().kind(JobKind::Comment).payload(payload).build()
    }

    #[tokio::test]
    async fn comment_is_generated_and_submitted_via_reused_session() {
        let test = mock_deps();
        test.generator.push_response("Great writeup, thanks for sharing.");

        let job = test
            .store
            .create(comment_job(serde_json::json!({
                "target_url": "https://blog.example/p/7",
                "session_id": "comment-profile"
            })))
            .await
            .unwrap();

        let result = CommentProcessor::new(test.deps.clone()).process(&job).await.unwrap();
        assert_eq!(result, "commented on https://blog.example/p/7");

        assert_eq!(
            test.browser.acquires(),
            vec![("comment-profile".to_string(), SessionMode::Reuse)]
        );
        let comments = test.browser.handle.comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, "https://blog.example/p/7");
        assert_eq!(comments[0].1, "Great writeup, thanks for sharing.");
        // Reused sessions stay open.
        assert_eq!(test.browser.handle.close_count(), 0);
    }

    #[tokio::test]
    async fn topic_hint_reaches_the_prompt() {
        let test = mock_deps();
        let job = test
            .store
            .create(comment_job(serde_json::json!({
                "target_url": "https://blog.example/p/8",
                "session_id": "comment-profile",
                "topic_hint": "ask about the price"
            })))
            .await
            .unwrap();

        CommentProcessor::new(test.deps.clone()).process(&job).await.unwrap();
        assert!(test.generator.prompts()[0].contains("ask about the price"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_acquire_failure_is_retried_within_the_run() {
        let test = mock_deps();
        test.browser.fail_next_acquire();
        test.generator.push_response("Nice post.");

        let job = test
            .store
            .create(comment_job(serde_json::json!({
                "target_url": "https://blog.example/p/9",
                "session_id": "comment-profile"
            })))
            .await
            .unwrap();

        // One session blip must not fail the whole job.
        let result = CommentProcessor::new(test.deps.clone()).process(&job).await.unwrap();
        assert_eq!(result, "commented on https://blog.example/p/9");
        assert_eq!(test.browser.acquires().len(), 2);
        assert_eq!(test.browser.handle.comments().len(), 1);
    }
}
