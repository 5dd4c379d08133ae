//! Server dependencies for workflows (using traits for testability)
//!
//! Central dependency container handed to every domain processor. All
//! external services sit behind trait abstractions so tests can swap in
//! the mocks from `test_dependencies`.

use std::sync::Arc;

use super::jobs::store::JobStore;
use super::traits::{
    BaseBrowserSession, BaseCaptchaSolver, BaseContentGenerator, BasePartnerApi, SessionMode,
};

/// Dependencies accessible to workflows.
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn JobStore>,
    pub browser: Arc<dyn BaseBrowserSession>,
    pub captcha: Arc<dyn BaseCaptchaSolver>,
    pub partner_api: Arc<dyn BasePartnerApi>,
    pub generator: Arc<dyn BaseContentGenerator>,
    /// Default session handling for publishing workflows.
    pub session_mode: SessionMode,
    /// Browser profile used when a payload does not name one.
    pub default_session_id: String,
}
