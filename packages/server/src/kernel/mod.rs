//! Infrastructure: the job system, external service clients, and the
//! dependency container the domain workflows run against.

pub mod browser_gateway;
pub mod captcha;
pub mod content;
pub mod deps;
mod http;
pub mod jobs;
pub mod partner_api;
pub mod test_dependencies;
pub mod traits;

pub use browser_gateway::BrowserGatewayClient;
pub use captcha::HttpCaptchaSolver;
pub use content::OpenAiGenerator;
pub use deps::ServerDeps;
pub use partner_api::PartnerHttpClient;
pub use traits::{
    BaseBrowserSession, BaseCaptchaSolver, BaseContentGenerator, BasePartnerApi, BrowserHandle,
    CrawledPost, DeepLink, PostDraft, Product, PublishedArtifact, SessionMode,
};
