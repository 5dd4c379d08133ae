// TestDependencies - mock implementations for testing
//
// Provides mock collaborators that can be injected into ServerDeps for
// tests. Each mock captures the calls made against it and can be scripted
// to fail.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::common::AutomationError;

use super::deps::ServerDeps;
use super::jobs::memory::MemoryJobStore;
use super::traits::{
    BaseBrowserSession, BaseCaptchaSolver, BaseContentGenerator, BasePartnerApi, BrowserHandle,
    CrawledPost, DeepLink, PostDraft, Product, PublishedArtifact, SessionMode,
};

// =============================================================================
// Mock Browser
// =============================================================================

pub struct MockBrowserSession {
    pub handle: Arc<MockBrowserHandle>,
    acquires: Mutex<Vec<(String, SessionMode)>>,
    fail_acquire: Mutex<bool>,
}

impl MockBrowserSession {
    pub fn new() -> Self {
        Self {
            handle: Arc::new(MockBrowserHandle::new()),
            acquires: Mutex::new(Vec::new()),
            fail_acquire: Mutex::new(false),
        }
    }

    pub fn fail_next_acquire(&self) {
        *self.fail_acquire.lock().unwrap() = true;
    }

    pub fn acquires(&self) -> Vec<(String, SessionMode)> {
        self.acquires.lock().unwrap().clone()
    }
}

impl Default for MockBrowserSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseBrowserSession for MockBrowserSession {
    async fn acquire(
        &self,
        session_id: &str,
        mode: SessionMode,
    ) -> Result<Arc<dyn BrowserHandle>, AutomationError> {
        self.acquires.lock().unwrap().push((session_id.to_string(), mode));
        if std::mem::take(&mut *self.fail_acquire.lock().unwrap()) {
            return Err(AutomationError::transient("mock: session unavailable"));
        }
        Ok(Arc::clone(&self.handle) as Arc<dyn BrowserHandle>)
    }
}

pub struct MockBrowserHandle {
    crawl_response: Mutex<Option<CrawledPost>>,
    publishes: Mutex<Vec<PostDraft>>,
    comments: Mutex<Vec<(String, String)>>,
    deletions: Mutex<Vec<String>>,
    closes: Mutex<usize>,
    fail_publish: Mutex<Option<AutomationError>>,
    fail_delete: Mutex<Option<AutomationError>>,
}

impl MockBrowserHandle {
    pub fn new() -> Self {
        Self {
            crawl_response: Mutex::new(Some(CrawledPost {
                title: "Sample post".into(),
                body: "Sample body in markdown.".into(),
                source_url: "https://source.example/p/1".into(),
            })),
            publishes: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            deletions: Mutex::new(Vec::new()),
            closes: Mutex::new(0),
            fail_publish: Mutex::new(None),
            fail_delete: Mutex::new(None),
        }
    }

    pub fn with_crawl_response(&self, post: CrawledPost) {
        *self.crawl_response.lock().unwrap() = Some(post);
    }

    pub fn fail_next_publish(&self, err: AutomationError) {
        *self.fail_publish.lock().unwrap() = Some(err);
    }

    pub fn fail_next_delete(&self, err: AutomationError) {
        *self.fail_delete.lock().unwrap() = Some(err);
    }

    pub fn publishes(&self) -> Vec<PostDraft> {
        self.publishes.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<(String, String)> {
        self.comments.lock().unwrap().clone()
    }

    pub fn deletions(&self) -> Vec<String> {
        self.deletions.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

impl Default for MockBrowserHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserHandle for MockBrowserHandle {
    async fn fetch_post(&self, url: &str) -> Result<CrawledPost, AutomationError> {
        self.crawl_response
            .lock()
            .unwrap()
            .clone()
            .map(|mut post| {
                post.source_url = url.to_string();
                post
            })
            .ok_or_else(|| AutomationError::transient("mock: no crawl response scripted"))
    }

    async fn publish_post(&self, draft: &PostDraft) -> Result<PublishedArtifact, AutomationError> {
        if let Some(err) = self.fail_publish.lock().unwrap().take() {
            return Err(err);
        }
        self.publishes.lock().unwrap().push(draft.clone());
        let n = self.publishes.lock().unwrap().len();
        Ok(PublishedArtifact {
            url: format!("https://blog.example/posts/{n}"),
            remote_id: format!("post-{n}"),
        })
    }

    async fn submit_comment(&self, target_url: &str, body: &str) -> Result<(), AutomationError> {
        self.comments
            .lock()
            .unwrap()
            .push((target_url.to_string(), body.to_string()));
        Ok(())
    }

    async fn delete_post(&self, artifact_url: &str) -> Result<(), AutomationError> {
        if let Some(err) = self.fail_delete.lock().unwrap().take() {
            return Err(err);
        }
        self.deletions.lock().unwrap().push(artifact_url.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

// =============================================================================
// Mock Captcha Solver
// =============================================================================

pub struct MockCaptchaSolver {
    solves: Mutex<usize>,
}

impl MockCaptchaSolver {
    pub fn new() -> Self {
        Self { solves: Mutex::new(0) }
    }

    pub fn solve_count(&self) -> usize {
        *self.solves.lock().unwrap()
    }
}

impl Default for MockCaptchaSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseCaptchaSolver for MockCaptchaSolver {
    async fn solve(&self, _image: &[u8]) -> Result<String, AutomationError> {
        *self.solves.lock().unwrap() += 1;
        Ok("MOCKED".into())
    }
}

// =============================================================================
// Mock Partner API
// =============================================================================

pub struct MockPartnerApi {
    products: Mutex<Vec<Product>>,
    searches: Mutex<Vec<(String, u32)>>,
    fail_search: Mutex<Option<AutomationError>>,
}

impl MockPartnerApi {
    pub fn new() -> Self {
        Self {
            products: Mutex::new(vec![Product {
                name: "Sample product".into(),
                url: "https://shop.example/item/1".into(),
                price: Some("19.99".into()),
                image_url: None,
            }]),
            searches: Mutex::new(Vec::new()),
            fail_search: Mutex::new(None),
        }
    }

    pub fn with_products(&self, products: Vec<Product>) {
        *self.products.lock().unwrap() = products;
    }

    pub fn fail_next_search(&self, err: AutomationError) {
        *self.fail_search.lock().unwrap() = Some(err);
    }

    pub fn searches(&self) -> Vec<(String, u32)> {
        self.searches.lock().unwrap().clone()
    }
}

impl Default for MockPartnerApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePartnerApi for MockPartnerApi {
    async fn search_products(&self, keyword: &str, limit: u32) -> Result<Vec<Product>, AutomationError> {
        self.searches.lock().unwrap().push((keyword.to_string(), limit));
        if let Some(err) = self.fail_search.lock().unwrap().take() {
            return Err(err);
        }
        let mut products = self.products.lock().unwrap().clone();
        products.truncate(limit as usize);
        Ok(products)
    }

    async fn create_deep_links(&self, urls: &[String]) -> Result<Vec<DeepLink>, AutomationError> {
        Ok(urls
            .iter()
            .map(|url| DeepLink {
                original_url: url.clone(),
                tracking_url: format!("https://track.example/?u={url}"),
            })
            .collect())
    }
}

// =============================================================================
// Mock Content Generator
// =============================================================================

pub struct MockContentGenerator {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockContentGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response; responses are consumed in order, falling back to
    /// a canned string when the queue runs dry.
    pub fn push_response(&self, response: &str) {
        self.responses.lock().unwrap().push(response.to_string());
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_response(&self) -> String {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            "mock generated content".to_string()
        } else {
            responses.remove(0)
        }
    }
}

impl Default for MockContentGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseContentGenerator for MockContentGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AutomationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.next_response())
    }

    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _schema: serde_json::Value,
    ) -> Result<String, AutomationError> {
        self.prompts
            .lock()
            .unwrap()
            .push(format!("{system_prompt}\n{user_prompt}"));
        Ok(self.next_response())
    }
}

// =============================================================================
// Assembled test deps
// =============================================================================

/// Everything a workflow test needs, with handles on the mocks for
/// scripting and assertions.
pub struct TestDeps {
    pub deps: ServerDeps,
    pub store: Arc<MemoryJobStore>,
    pub browser: Arc<MockBrowserSession>,
    pub captcha: Arc<MockCaptchaSolver>,
    pub partner_api: Arc<MockPartnerApi>,
    pub generator: Arc<MockContentGenerator>,
}

/// Build ServerDeps wired entirely to mocks.
pub fn mock_deps() -> TestDeps {
    let store = Arc::new(MemoryJobStore::new());
    let browser = Arc::new(MockBrowserSession::new());
    let captcha = Arc::new(MockCaptchaSolver::new());
    let partner_api = Arc::new(MockPartnerApi::new());
    let generator = Arc::new(MockContentGenerator::new());

    let deps = ServerDeps {
        store: store.clone(),
        browser: browser.clone(),
        captcha: captcha.clone(),
        partner_api: partner_api.clone(),
        generator: generator.clone(),
        session_mode: SessionMode::Exclusive,
        default_session_id: "test-profile".into(),
    };

    TestDeps {
        deps,
        store,
        browser,
        captcha,
        partner_api,
        generator,
    }
}
