//! Error classification and pipeline failure types.

/// Classification of failures for retry decisions.
///
/// Implemented by the application's error taxonomy so the pipeline executor
/// can decide whether a step failure is worth re-attempting.
pub trait ErrorClass {
    /// Whether the failure may succeed on a re-attempt.
    ///
    /// Transient failures (timeouts, temporary unavailability, rate limiting)
    /// return `true`; permanent failures (bad input, policy violations,
    /// missing credentials) return `false` and abort immediately.
    fn is_transient(&self) -> bool;
}

/// A pipeline run aborted at a named step.
///
/// The source error is preserved unchanged; `step` and `attempts` exist for
/// observability only.
#[derive(Debug, thiserror::Error)]
#[error("step '{step}' failed after {attempts} attempt(s): {source}")]
pub struct PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// Name of the step that exhausted its retries (or had none).
    pub step: &'static str,
    /// How many times the step was invoked, including the first try.
    pub attempts: u32,
    /// The last error the step produced, unchanged.
    #[source]
    pub source: E,
}

impl<E> PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// Consume the wrapper and recover the step's original error.
    pub fn into_source(self) -> E {
        self.source
    }
}
