use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::kernel::jobs::{JobKind, SchedulerConfig};
use crate::kernel::SessionMode;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    // Browser gateway
    pub browser_gateway_url: String,
    pub default_session_id: String,
    /// "exclusive" (default) or "reuse"
    pub session_mode: SessionMode,

    // Captcha service
    pub captcha_api_url: String,
    pub captcha_api_key: String,

    // Partner (affiliate) API
    pub partner_api_url: String,
    pub partner_access_key: String,
    pub partner_rate_capacity: u32,
    pub partner_rate_window: Duration,

    // LLM
    pub openai_api_url: String,
    pub openai_api_key: String,
    pub openai_model: String,

    // Scheduler
    pub poll_interval: Duration,
    pub delete_interval: Duration,
    pub per_kind_limits: HashMap<JobKind, usize>,
}

fn env_duration_secs(key: &str, default_secs: u64) -> Result<Duration> {
    let secs: u64 = env::var(key)
        .unwrap_or_else(|_| default_secs.to_string())
        .parse()
        .with_context(|| format!("{key} must be a valid number of seconds"))?;
    Ok(Duration::from_secs(secs))
}

fn env_limit(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(raw) => {
            let limit: usize = raw.parse().with_context(|| format!("{key} must be a valid number"))?;
            Ok(Some(limit))
        }
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let session_mode = match env::var("SESSION_MODE").as_deref() {
            Ok("reuse") => SessionMode::Reuse,
            Ok("exclusive") | Err(_) => SessionMode::Exclusive,
            Ok(other) => anyhow::bail!("SESSION_MODE must be 'exclusive' or 'reuse', got '{other}'"),
        };

        let mut per_kind_limits = HashMap::new();
        if let Some(limit) = env_limit("JOB_LIMIT_POST")? {
            per_kind_limits.insert(JobKind::Post, limit);
        }
        if let Some(limit) = env_limit("JOB_LIMIT_COMMENT")? {
            per_kind_limits.insert(JobKind::Comment, limit);
        }
        if let Some(limit) = env_limit("JOB_LIMIT_AFFILIATE")? {
            per_kind_limits.insert(JobKind::Affiliate, limit);
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            browser_gateway_url: env::var("BROWSER_GATEWAY_URL")
                .context("BROWSER_GATEWAY_URL must be set")?,
            default_session_id: env::var("DEFAULT_SESSION_ID")
                .unwrap_or_else(|_| "default".to_string()),
            session_mode,
            captcha_api_url: env::var("CAPTCHA_API_URL").context("CAPTCHA_API_URL must be set")?,
            captcha_api_key: env::var("CAPTCHA_API_KEY").context("CAPTCHA_API_KEY must be set")?,
            partner_api_url: env::var("PARTNER_API_URL").context("PARTNER_API_URL must be set")?,
            partner_access_key: env::var("PARTNER_ACCESS_KEY")
                .context("PARTNER_ACCESS_KEY must be set")?,
            partner_rate_capacity: env::var("PARTNER_RATE_CAPACITY")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("PARTNER_RATE_CAPACITY must be a valid number")?,
            partner_rate_window: env_duration_secs("PARTNER_RATE_WINDOW_SECS", 60)?,
            openai_api_url: env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            poll_interval: env_duration_secs("POLL_INTERVAL_SECS", 10)?,
            delete_interval: env_duration_secs("DELETE_INTERVAL_SECS", 60)?,
            per_kind_limits,
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: self.poll_interval,
            delete_interval: self.delete_interval,
            per_kind_limits: self.per_kind_limits.clone(),
            ..SchedulerConfig::default()
        }
    }
}
