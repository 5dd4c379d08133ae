//! Post workflow: crawl a source post, derive keywords, link affiliate
//! products, compose a rewritten draft, and publish it.
//!
//! Rendered as a conveyor pipeline over a shared run state. Each step
//! mutates the state in place; a failure aborts the run with the step's
//! name attached, and cleanup removes the temp workdir and closes the
//! browser session regardless of outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor::{Backoff, Pipeline, RetryPolicy, Step};
use tracing::{debug, info};

use crate::common::AutomationError;
use crate::kernel::jobs::{Job, JobKind, JobProcessor, PostPayload};
use crate::kernel::traits::{
    BrowserHandle, CrawledPost, DeepLink, PostDraft, PublishedArtifact, SessionMode,
};
use crate::kernel::ServerDeps;

pub struct PostProcessor {
    deps: ServerDeps,
}

impl PostProcessor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

/// State threaded through the post pipeline. Steps fill it in order;
/// nothing here is persisted.
struct PostRunState {
    deps: ServerDeps,
    payload: PostPayload,
    job_id: uuid::Uuid,
    workdir: Option<PathBuf>,
    session: Option<Arc<dyn BrowserHandle>>,
    crawled: Option<CrawledPost>,
    keywords: Vec<String>,
    links: Vec<DeepLink>,
    draft: Option<PostDraft>,
    artifact: Option<PublishedArtifact>,
}

fn transient_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), 3, Backoff::Exponential)
}

fn missing(step: &str) -> AutomationError {
    // A later step observing unset state means a step ordering bug.
    AutomationError::terminal(format!("pipeline state missing before '{step}'"))
}

async fn prepare_workdir(s: &mut PostRunState) -> Result<(), AutomationError> {
    let dir = std::env::temp_dir().join(format!("post-job-{}", s.job_id));
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AutomationError::transient(format!("failed to create workdir: {e}")))?;
    debug!(path = %dir.display(), "workdir prepared");
    s.workdir = Some(dir);
    Ok(())
}

async fn acquire_session(s: &mut PostRunState) -> Result<(), AutomationError> {
    let session = s
        .deps
        .browser
        .acquire(&s.payload.session_id, s.deps.session_mode)
        .await?;
    s.session = Some(session);
    Ok(())
}

async fn crawl_source(s: &mut PostRunState) -> Result<(), AutomationError> {
    let session = s.session.as_ref().ok_or_else(|| missing("crawl_source"))?;
    let crawled = session.fetch_post(&s.payload.source_url).await?;

    // Keep the raw markdown on disk so a failed run can be inspected.
    if let Some(workdir) = &s.workdir {
        tokio::fs::write(workdir.join("source.md"), &crawled.body)
            .await
            .map_err(|e| AutomationError::transient(format!("failed to write crawl snapshot: {e}")))?;
    }

    info!(title = %crawled.title, "source post crawled");
    s.crawled = Some(crawled);
    Ok(())
}

async fn derive_keywords(s: &mut PostRunState) -> Result<(), AutomationError> {
    let crawled = s.crawled.as_ref().ok_or_else(|| missing("derive_keywords"))?;

    let prompt = format!(
        "Extract up to 5 product search keywords from this post. \
         Return a JSON array of strings and nothing else.\n\nTitle: {}\n\n{}",
        crawled.title, crawled.body
    );
    let raw = s.deps.generator.generate(&prompt).await?;
    let keywords: Vec<String> = serde_json::from_str(raw.trim())
        .map_err(|e| AutomationError::transient(format!("keyword response did not parse: {e}")))?;
    if keywords.is_empty() {
        return Err(AutomationError::terminal("no keywords derivable from source post"));
    }

    debug!(?keywords, "keywords derived");
    s.keywords = keywords;
    Ok(())
}

async fn search_products(s: &mut PostRunState) -> Result<(), AutomationError> {
    let mut urls = Vec::new();
    for keyword in &s.keywords {
        let products = s.deps.partner_api.search_products(keyword, 3).await?;
        urls.extend(products.into_iter().map(|p| p.url));
    }
    if urls.is_empty() {
        // Nothing matched; publish without affiliate links rather than fail.
        debug!("no products found for derived keywords");
        return Ok(());
    }
    s.links = s.deps.partner_api.create_deep_links(&urls).await?;
    Ok(())
}

async fn compose_draft(s: &mut PostRunState) -> Result<(), AutomationError> {
    let crawled = s.crawled.as_ref().ok_or_else(|| missing("compose_draft"))?;

    let links_block = s
        .links
        .iter()
        .map(|l| l.tracking_url.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "body": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["title", "body", "tags"]
    });
    let raw = s
        .deps
        .generator
        .generate_structured(
            "You rewrite blog posts. Produce an original post based on the source, \
             weaving in the provided affiliate links where they fit naturally.",
            &format!(
                "Source title: {}\n\nSource body:\n{}\n\nAffiliate links:\n{links_block}",
                crawled.title, crawled.body
            ),
            schema,
        )
        .await?;

    #[derive(serde::Deserialize)]
    struct DraftShape {
        title: String,
        body: String,
        tags: Vec<String>,
    }
    let shape: DraftShape = serde_json::from_str(raw.trim())
        .map_err(|e| AutomationError::transient(format!("draft response did not parse: {e}")))?;

    s.draft = Some(PostDraft {
        title: shape.title,
        body: shape.body,
        category: s.payload.category.clone(),
        tags: shape.tags,
    });
    Ok(())
}

async fn publish(s: &mut PostRunState) -> Result<(), AutomationError> {
    let session = s.session.as_ref().ok_or_else(|| missing("publish"))?;
    let draft = s.draft.as_ref().ok_or_else(|| missing("publish"))?;

    let artifact = session.publish_post(draft).await?;
    info!(url = %artifact.url, "draft published");
    s.artifact = Some(artifact);
    Ok(())
}

async fn cleanup(s: &mut PostRunState) {
    if let Some(workdir) = s.workdir.take() {
        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            debug!(path = %workdir.display(), error = %e, "workdir removal failed");
        }
    }
    if let Some(session) = s.session.take() {
        if s.deps.session_mode == SessionMode::Exclusive {
            if let Err(e) = session.close().await {
                debug!(error = %e, "session close failed");
            }
        }
    }
}

fn build_pipeline() -> Pipeline<PostRunState, AutomationError> {
    Pipeline::new()
        .step(Step::new("prepare_workdir", |s: &mut PostRunState| {
            Box::pin(prepare_workdir(s))
        }))
        .step(
            Step::new("acquire_session", |s: &mut PostRunState| {
                Box::pin(acquire_session(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("crawl_source", |s: &mut PostRunState| Box::pin(crawl_source(s)))
                .with_retry(transient_policy()),
        )
        .step(
            Step::new("derive_keywords", |s: &mut PostRunState| {
                Box::pin(derive_keywords(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("search_products", |s: &mut PostRunState| {
                Box::pin(search_products(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("compose_draft", |s: &mut PostRunState| Box::pin(compose_draft(s)))
                .with_retry(transient_policy()),
        )
        .step(
            Step::new("publish", |s: &mut PostRunState| Box::pin(publish(s)))
                .with_retry(transient_policy()),
        )
        .cleanup(|s: &mut PostRunState| Box::pin(cleanup(s)))
}

#[async_trait]
impl JobProcessor for PostProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Post
    }

    async fn process(&self, job: &Job) -> Result<String, AutomationError> {
        let payload: PostPayload = job.payload_as()?;

        let mut state = PostRunState {
            deps: self.deps.clone(),
            payload,
            job_id: job.id,
            workdir: None,
            session: None,
            crawled: None,
            keywords: Vec::new(),
            links: Vec::new(),
            draft: None,
            artifact: None,
        };

        build_pipeline()
            .run(&mut state)
            .await
            .map_err(AutomationError::from_pipeline)?;

        state
            .artifact
            .map(|a| a.url)
            .ok_or_else(|| AutomationError::terminal("pipeline finished without a published artifact"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{JobStore, NewJob};
    use crate::kernel::test_dependencies::mock_deps;

    fn post_job() -> NewJob {
        NewJob::builder()
            .kind(JobKind::Post)
            .payload(serde_json::json!({
                "source_url": "https://source.example/p/42",
                "session_id": "blog-profile"
            }))
            .build()
    }

    #[tokio::test]
    async fn happy_path_publishes_and_returns_artifact_url() {
        let test = mock_deps();
        test.generator.push_response(r#"["wool socks", "hiking boots"]"#);
        test.generator.push_response(
            r#"{"title": "Rewritten", "body": "New body", "tags": ["outdoors"]}"#,
        );

        let job = test.store.create(post_job()).await.unwrap();
        let processor = PostProcessor::new(test.deps.clone());

        let result = processor.process(&job).await.unwrap();
        assert_eq!(result, "https://blog.example/posts/1");

        // Both keywords were searched, and the exclusive session was closed.
        assert_eq!(test.partner_api.searches().len(), 2);
        assert_eq!(test.browser.handle.close_count(), 1);
        assert_eq!(test.browser.handle.publishes().len(), 1);
    }

    #[tokio::test]
    async fn terminal_publish_failure_names_the_step() {
        let test = mock_deps();
        test.generator.push_response(r#"["wool socks"]"#);
        test.generator
            .push_response(r#"{"title": "T", "body": "B", "tags": []}"#);
        test.browser
            .handle
            .fail_next_publish(AutomationError::terminal("post blacklisted"));

        let job = test.store.create(post_job()).await.unwrap();
        let processor = PostProcessor::new(test.deps.clone());

        let err = processor.process(&job).await.unwrap_err();
        assert!(err.to_string().contains("publish"), "error was: {err}");

        // Cleanup still ran.
        assert_eq!(test.browser.handle.close_count(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_terminal_without_side_effects() {
        let test = mock_deps();
        let job = test
            .store
            .create(
                NewJob::builder()
                    .kind(JobKind::Post)
                    .payload(serde_json::json!({ "nope": 1 }))
                    .build(),
            )
            .await
            .unwrap();
        let processor = PostProcessor::new(test.deps.clone());

        let err = processor.process(&job).await.unwrap_err();
        assert!(matches!(err, AutomationError::Terminal(_)));
        assert!(test.browser.acquires().is_empty());
    }
}
