// Content-automation orchestration server.
//
// Automates multi-step content operations (crawl a source post, derive
// keywords, search and affiliate-link products, publish, comment) against
// external, unreliable, rate-limited collaborators: a browser-driven site,
// a quota-constrained partner API, and an LLM.
//
// The engine lives in kernel/jobs (job model, store contract, scheduler,
// processor registry); per-kind workflows live in domains/*.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::Config;
