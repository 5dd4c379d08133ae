// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Workflow logic (like "run a post job") lives in the domain processors
// that consume these traits.
//
// Naming convention: Base* for trait names (e.g., BasePartnerApi)

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::AutomationError;

// =============================================================================
// DTOs crossing the trait boundary
// =============================================================================

/// A post fetched from the source site, ready for rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPost {
    pub title: String,
    /// Markdown body of the crawled post.
    pub body: String,
    pub source_url: String,
}

/// A composed post, ready to publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// What publishing produced on the remote site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Public URL of the published post. Persisted as the job's result.
    pub url: String,
    /// Site-internal identifier, used for deletion.
    pub remote_id: String,
}

/// An affiliate product returned by the partner search API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub url: String,
    pub price: Option<String>,
    pub image_url: Option<String>,
}

/// A tracking link minted for a product URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepLink {
    pub original_url: String,
    pub tracking_url: String,
}

/// How a workflow wants its browser session handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Fresh session, closed by the workflow's cleanup.
    Exclusive,
    /// Shared long-lived session, left open for the next job.
    Reuse,
}

// =============================================================================
// Browser automation
// =============================================================================

/// Hands out browser sessions bound to a stored login profile.
#[async_trait]
pub trait BaseBrowserSession: Send + Sync {
    async fn acquire(
        &self,
        session_id: &str,
        mode: SessionMode,
    ) -> Result<Arc<dyn BrowserHandle>, AutomationError>;
}

/// One live browser session on the remote gateway.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Fetch and extract a post from the source site.
    async fn fetch_post(&self, url: &str) -> Result<CrawledPost, AutomationError>;

    /// Publish a draft to the blog; returns where it landed.
    async fn publish_post(&self, draft: &PostDraft) -> Result<PublishedArtifact, AutomationError>;

    /// Submit a comment under the target post.
    async fn submit_comment(&self, target_url: &str, body: &str) -> Result<(), AutomationError>;

    /// Remove a previously published post. Already-gone is success.
    async fn delete_post(&self, artifact_url: &str) -> Result<(), AutomationError>;

    /// Tear the session down. Reused sessions are never closed by workflows.
    async fn close(&self) -> Result<(), AutomationError>;
}

// =============================================================================
// Captcha solving
// =============================================================================

#[async_trait]
pub trait BaseCaptchaSolver: Send + Sync {
    /// Solve a captcha image, returning the answer text.
    async fn solve(&self, image: &[u8]) -> Result<String, AutomationError>;
}

// =============================================================================
// Partner (affiliate) API
// =============================================================================

#[async_trait]
pub trait BasePartnerApi: Send + Sync {
    async fn search_products(&self, keyword: &str, limit: u32) -> Result<Vec<Product>, AutomationError>;

    /// Mint tracking links for product URLs, order-preserving.
    async fn create_deep_links(&self, urls: &[String]) -> Result<Vec<DeepLink>, AutomationError>;
}

// =============================================================================
// Content generation (LLM)
// =============================================================================

#[async_trait]
pub trait BaseContentGenerator: Send + Sync {
    /// Complete a prompt with the LLM (raw text response).
    async fn generate(&self, prompt: &str) -> Result<String, AutomationError>;

    /// Generate output conforming to a JSON schema.
    /// Parse with serde_json::from_str in calling code.
    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: serde_json::Value,
    ) -> Result<String, AutomationError>;
}
