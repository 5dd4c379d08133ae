//! Linear pipeline executor.
//!
//! Runs a named, ordered list of steps over one shared mutable state value.
//! The observed real-world workflows are all linear chains, so this is a
//! plain list interpreter rather than a DAG engine.
//!
//! There is no saga or compensation mechanism: an aborted run leaves real-
//! world effects in place as a disposable cost, and the unit of retry is the
//! whole job, not a mid-pipeline resume.

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::{ErrorClass, PipelineError};
use crate::retry::RetryPolicy;

type StepFn<S, E> = Box<dyn for<'a> Fn(&'a mut S) -> BoxFuture<'a, Result<(), E>> + Send + Sync>;
type CleanupFn<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

/// One named stage of a pipeline run.
///
/// The closure mutates the shared state directly; that is the merge of the
/// "partial state" a step produces.
pub struct Step<S, E> {
    name: &'static str,
    run: StepFn<S, E>,
    retry: Option<RetryPolicy>,
}

impl<S, E> Step<S, E> {
    /// Create a step. The closure must box its future:
    ///
    /// ```ignore
    /// Step::new("crawl", |state: &mut RunState| {
    ///     Box::pin(async move {
    ///         state.post = Some(fetch(&state.url).await?);
    ///         Ok(())
    ///     })
    /// })
    /// ```
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut S) -> BoxFuture<'a, Result<(), E>> + Send + Sync + 'static,
    {
        Self {
            name,
            run: Box::new(run),
            retry: None,
        }
    }

    /// Attach a retry policy. Only transient failures (per [`ErrorClass`])
    /// are re-attempted; terminal failures abort on first sight.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// An ordered list of steps plus an unconditional cleanup block.
pub struct Pipeline<S, E> {
    steps: Vec<Step<S, E>>,
    cleanup: Option<CleanupFn<S>>,
}

impl<S, E> Default for Pipeline<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E> Pipeline<S, E> {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            cleanup: None,
        }
    }

    /// Append a step. Steps execute strictly in insertion order.
    pub fn step(mut self, step: Step<S, E>) -> Self {
        self.steps.push(step);
        self
    }

    /// Set a cleanup block that runs after the pipeline finishes, whether it
    /// succeeded or aborted. A scoped finalizer, not a compensating
    /// transaction.
    pub fn cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

impl<S, E> Pipeline<S, E>
where
    S: Send,
    E: ErrorClass + std::error::Error + Send + 'static,
{
    /// Execute all steps in order against `state`.
    ///
    /// On an unrecoverable step failure the run aborts immediately: later
    /// steps never execute and the accumulated state is dropped with the
    /// run. The cleanup block runs in every case.
    pub async fn run(self, state: &mut S) -> Result<(), PipelineError<E>> {
        let Pipeline { steps, cleanup } = self;

        let mut outcome = Ok(());
        for step in &steps {
            if let Err(err) = Self::run_step(step, state).await {
                outcome = Err(err);
                break;
            }
        }

        if let Some(cleanup) = cleanup {
            cleanup(state).await;
        }

        outcome
    }

    async fn run_step(step: &Step<S, E>, state: &mut S) -> Result<(), PipelineError<E>> {
        let mut attempt: u32 = 1;
        loop {
            match (step.run)(state).await {
                Ok(()) => {
                    debug!(step = step.name, attempt, "step completed");
                    return Ok(());
                }
                Err(err) => match step.retry {
                    Some(policy) if err.is_transient() && attempt < policy.max_attempts => {
                        let delay = policy.delay_after(attempt);
                        warn!(
                            step = step.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "step failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => {
                        return Err(PipelineError {
                            step: step.name,
                            attempts: attempt,
                            source: err,
                        });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient: {0}")]
        Transient(&'static str),
        #[error("terminal: {0}")]
        Terminal(&'static str),
    }

    impl ErrorClass for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient(_))
        }
    }

    #[derive(Default)]
    struct RunState {
        trace: Vec<&'static str>,
    }

    fn recording_step(name: &'static str) -> Step<RunState, TestError> {
        Step::new(name, move |state: &mut RunState| {
            Box::pin(async move {
                state.trace.push(name);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn default_pipeline_is_an_empty_run() {
        let mut state = RunState::default();
        Pipeline::<RunState, TestError>::default()
            .run(&mut state)
            .await
            .unwrap();
        assert!(state.trace.is_empty());
    }

    #[tokio::test]
    async fn steps_run_in_strict_order() {
        let mut state = RunState::default();
        Pipeline::new()
            .step(recording_step("one"))
            .step(recording_step("two"))
            .step(recording_step("three"))
            .run(&mut state)
            .await
            .unwrap();

        assert_eq!(state.trace, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn failing_middle_step_aborts_and_names_itself() {
        let mut state = RunState::default();
        let err = Pipeline::new()
            .step(recording_step("one"))
            .step(Step::new("two", |state: &mut RunState| {
                Box::pin(async move {
                    state.trace.push("two");
                    Err(TestError::Terminal("blacklisted"))
                })
            }))
            .step(recording_step("three"))
            .run(&mut state)
            .await
            .unwrap_err();

        // Step three never ran; the error identifies step two by name.
        assert_eq!(state.trace, vec!["one", "two"]);
        assert_eq!(err.step, "two");
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.into_source(), TestError::Terminal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_up_to_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut state = RunState::default();
        let result = Pipeline::new()
            .step(
                Step::new("flaky", move |_state: &mut RunState| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Box::pin(async move {
                        if n < 3 {
                            Err(TestError::Transient("timeout"))
                        } else {
                            Ok(())
                        }
                    })
                })
                .with_retry(RetryPolicy::new(
                    Duration::from_millis(100),
                    3,
                    Backoff::Exponential,
                )),
            )
            .run(&mut state)
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_reports_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut state = RunState::default();
        let err = Pipeline::new()
            .step(
                Step::new("flaky", move |_state: &mut RunState| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move { Err(TestError::Transient("timeout")) })
                })
                .with_retry(RetryPolicy::new(Duration::from_millis(10), 3, Backoff::None)),
            )
            .run(&mut state)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.source, TestError::Transient(_)));
    }

    #[tokio::test]
    async fn terminal_failure_skips_retry_despite_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut state = RunState::default();
        let err = Pipeline::new()
            .step(
                Step::new("doomed", move |_state: &mut RunState| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move { Err(TestError::Terminal("missing credentials")) })
                })
                .with_retry(RetryPolicy::new(Duration::from_millis(10), 5, Backoff::None)),
            )
            .run(&mut state)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn cleanup_runs_on_success_and_on_abort() {
        for fail in [false, true] {
            let cleaned = Arc::new(AtomicBool::new(false));
            let flag = cleaned.clone();

            let mut state = RunState::default();
            let pipeline = Pipeline::new()
                .step(Step::new("maybe", move |_state: &mut RunState| {
                    Box::pin(async move {
                        if fail {
                            Err(TestError::Terminal("no"))
                        } else {
                            Ok(())
                        }
                    })
                }))
                .cleanup(move |_state: &mut RunState| {
                    Box::pin(async move {
                        flag.store(true, Ordering::SeqCst);
                    })
                });

            let result = pipeline.run(&mut state).await;
            assert_eq!(result.is_err(), fail);
            assert!(cleaned.load(Ordering::SeqCst));
        }
    }
}
