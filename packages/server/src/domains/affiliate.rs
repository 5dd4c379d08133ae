//! Affiliate workflow: product-first publishing. Search the partner API
//! for a keyword, mint tracking links, compose a product roundup, publish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor::{Backoff, Pipeline, RetryPolicy, Step};
use tracing::info;

use crate::common::AutomationError;
use crate::kernel::jobs::{AffiliatePayload, Job, JobKind, JobProcessor};
use crate::kernel::traits::{
    BrowserHandle, DeepLink, PostDraft, Product, PublishedArtifact, SessionMode,
};
use crate::kernel::ServerDeps;

pub struct AffiliateProcessor {
    deps: ServerDeps,
}

impl AffiliateProcessor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

struct AffiliateRunState {
    deps: ServerDeps,
    payload: AffiliatePayload,
    session: Option<Arc<dyn BrowserHandle>>,
    products: Vec<Product>,
    links: Vec<DeepLink>,
    draft: Option<PostDraft>,
    artifact: Option<PublishedArtifact>,
}

fn transient_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), 3, Backoff::Exponential)
}

fn missing(step: &str) -> AutomationError {
    AutomationError::terminal(format!("pipeline state missing before '{step}'"))
}

async fn search_products(s: &mut AffiliateRunState) -> Result<(), AutomationError> {
    let products = s
        .deps
        .partner_api
        .search_products(&s.payload.keyword, s.payload.product_limit)
        .await?;
    if products.is_empty() {
        // An empty catalog for the keyword will not improve on retry.
        return Err(AutomationError::terminal(format!(
            "no products found for keyword '{}'",
            s.payload.keyword
        )));
    }
    s.products = products;
    Ok(())
}

async fn create_deep_links(s: &mut AffiliateRunState) -> Result<(), AutomationError> {
    let urls: Vec<String> = s.products.iter().map(|p| p.url.clone()).collect();
    s.links = s.deps.partner_api.create_deep_links(&urls).await?;
    Ok(())
}

async fn compose_draft(s: &mut AffiliateRunState) -> Result<(), AutomationError> {
    let listing = s
        .products
        .iter()
        .zip(&s.links)
        .map(|(p, l)| {
            format!(
                "- {} ({}) -> {}",
                p.name,
                p.price.as_deref().unwrap_or("price unknown"),
                l.tracking_url
            )
        })
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
            "You write product roundup blog posts. Recommend the listed products \
             honestly, linking each with its tracking URL.",
            &format!("Keyword: {}\n\nProducts:\n{listing}", s.payload.keyword),
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
        category: None,
        tags: shape.tags,
    });
    Ok(())
}

async fn acquire_and_publish(s: &mut AffiliateRunState) -> Result<(), AutomationError> {
    let draft = s.draft.as_ref().ok_or_else(|| missing("publish"))?;

    let session = s
        .deps
        .browser
        .acquire(&s.payload.session_id, s.deps.session_mode)
        .await?;
    let artifact = session.publish_post(draft).await?;
    info!(url = %artifact.url, keyword = %s.payload.keyword, "roundup published");

    s.session = Some(session);
    s.artifact = Some(artifact);
    Ok(())
}

async fn cleanup(s: &mut AffiliateRunState) {
    if let Some(session) = s.session.take() {
        if s.deps.session_mode == SessionMode::Exclusive {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "session close failed");
            }
        }
    }
}

fn build_pipeline() -> Pipeline<AffiliateRunState, AutomationError> {
    Pipeline::new()
        .step(
            Step::new("search_products", |s: &mut AffiliateRunState| {
                Box::pin(search_products(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("create_deep_links", |s: &mut AffiliateRunState| {
                Box::pin(create_deep_links(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("compose_draft", |s: &mut AffiliateRunState| {
                Box::pin(compose_draft(s))
            })
            .with_retry(transient_policy()),
        )
        .step(
            Step::new("publish", |s: &mut AffiliateRunState| {
                Box::pin(acquire_and_publish(s))
            })
            .with_retry(transient_policy()),
        )
        .cleanup(|s: &mut AffiliateRunState| Box::pin(cleanup(s)))
}

#[async_trait]
impl JobProcessor for AffiliateProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Affiliate
    }

    async fn process(&self, job: &Job) -> Result<String, AutomationError> {
        let payload: AffiliatePayload = job.payload_as()?;

        let mut state = AffiliateRunState {
            deps: self.deps.clone(),
            payload,
            session: None,
            products: Vec::new(),
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

    fn affiliate_job(keyword: &str) -> NewJob {
        NewJob::builder()
            .kind(JobKind::Affiliate)
            .payload(serde_json::json!({
                "keyword": keyword,
                "session_id": "blog-profile",
                "product_limit": 5
            }))
            .build()
    }

    #[tokio::test]
    async fn keyword_search_drives_a_published_roundup() {
        let test = mock_deps();
        test.generator
            .push_response(r#"{"title": "Top picks", "body": "...", "tags": ["deals"]}"#);

        let job = test.store.create(affiliate_job("wool socks")).await.unwrap();
        let result = AffiliateProcessor::new(test.deps.clone()).process(&job).await.unwrap();
        assert_eq!(result, "https://blog.example/posts/1");

        assert_eq!(test.partner_api.searches(), vec![("wool socks".to_string(), 5)]);
        assert_eq!(test.browser.handle.publishes().len(), 1);
    }

    #[tokio::test]
    async fn empty_search_result_is_terminal() {
        let test = mock_deps();
        test.partner_api.with_products(vec![]);

        let job = test.store.create(affiliate_job("nonexistent")).await.unwrap();
        let err = AffiliateProcessor::new(test.deps.clone()).process(&job).await.unwrap_err();
        assert!(matches!(err, AutomationError::Terminal(_)));
        // Terminal failure in step one: nothing was published.
        assert!(test.browser.handle.publishes().is_empty());
    }
}
