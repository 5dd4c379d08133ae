//! Error taxonomy for automation work.
//!
//! Four failure families with distinct handling:
//! - `Validation` — bad input, rejected before a job exists, never retried
//! - `Transient` — timeout / network / captcha mismatch, retried per policy
//! - `Terminal` — policy violation or missing credentials, aborts immediately
//! - `Persistence` — job store unreachable, surfaced to the scheduler tick
//!   which logs and retries on its next natural tick

use conveyor::{ErrorClass, PipelineError};

use crate::kernel::jobs::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    /// Bad input. Rejected before a job is created; never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// May succeed on a re-attempt (timeout, network failure, captcha
    /// mismatch). Retried per the step's policy.
    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),

    /// Permanent (target blacklisted, credentials missing). Aborts the run
    /// immediately; no retry.
    #[error("terminal failure: {0:#}")]
    Terminal(anyhow::Error),

    /// Job store unreachable or inconsistent.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl AutomationError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(anyhow::anyhow!(msg.into()))
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(anyhow::anyhow!(msg.into()))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Collapse a pipeline failure back into the taxonomy, carrying the
    /// failing step's name into the message for observability.
    pub fn from_pipeline(err: PipelineError<AutomationError>) -> Self {
        let step = err.step;
        match err.into_source() {
            Self::Transient(e) => Self::Transient(e.context(format!("step '{step}'"))),
            Self::Terminal(e) => Self::Terminal(e.context(format!("step '{step}'"))),
            Self::Validation(msg) => Self::Validation(format!("step '{step}': {msg}")),
            Self::Persistence(e) => Self::Persistence(e),
        }
    }
}

impl ErrorClass for AutomationError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_persistence_are_retryable() {
        assert!(AutomationError::transient("timeout").is_transient());
        let store_err = AutomationError::Persistence(StoreError::NotFound(uuid::Uuid::nil()));
        assert!(store_err.is_transient());
    }

    #[test]
    fn terminal_and_validation_are_not_retryable() {
        assert!(!AutomationError::terminal("blacklisted").is_transient());
        assert!(!AutomationError::validation("bad schedule").is_transient());
    }
}
