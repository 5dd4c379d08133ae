//! Generic retry with configurable backoff.
//!
//! The primitive performs no deduplication: operations are assumed to be
//! safely re-callable (idempotent, or at least non-corrupting on partial
//! failure). After the final attempt the last error is returned unchanged so
//! callers can still inspect the original failure kind.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How the wait interval grows between attempts.
///
/// There is deliberately no jitter and no interval cap; both are preserved
/// as-is because the rate-limit behavior of the downstream systems is
/// unverified. Callers that need a ceiling pick a smaller base interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Constant `base_interval` between attempts.
    None,
    /// `base_interval * attempt` after the n-th failed attempt.
    Linear,
    /// `base_interval * 2^(attempt - 1)` after the n-th failed attempt.
    #[default]
    Exponential,
}

/// Retry configuration attached to an operation or a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base wait interval between attempts.
    pub base_interval: Duration,
    /// Total number of invocations, including the first try. Always at
    /// least one invocation happens even if this is zero.
    pub max_attempts: u32,
    /// Growth curve for the wait interval.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(base_interval: Duration, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            base_interval,
            max_attempts,
            backoff,
        }
    }

    /// The wait interval after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::None => self.base_interval,
            Backoff::Linear => self.base_interval.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_interval
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        }
    }
}

/// Invoke `op` until it succeeds or `policy.max_attempts` is exhausted.
///
/// Every error is considered retryable; use [`retry_if`] to stop early on
/// permanent failures.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(policy, op, |_| true).await
}

/// Invoke `op` until it succeeds, `policy.max_attempts` is exhausted, or
/// `should_retry` rejects the error.
///
/// The error returned is always the last one `op` produced, unwrapped.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: RetryPolicy,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    struct Boom(u32);

    impl Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom #{}", self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_calls_three_times_with_doubling_sleeps() {
        let calls = AtomicU32::new(0);
        let timestamps = Mutex::new(Vec::new());

        let policy = RetryPolicy::new(Duration::from_millis(1000), 3, Backoff::Exponential);
        let result: Result<(), Boom> = retry(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            timestamps.lock().unwrap().push(Instant::now());
            async move { Err(Boom(n)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stamps = timestamps.lock().unwrap();
        assert_eq!(stamps[1] - stamps[0], Duration::from_millis(1000));
        assert_eq!(stamps[2] - stamps[1], Duration::from_millis(2000));

        // The last error comes back unchanged, not wrapped.
        assert_eq!(result.unwrap_err(), Boom(3));
    }

    #[tokio::test(start_paused = true)]
    async fn linear_backoff_grows_with_attempt_number() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 4, Backoff::Linear);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn constant_backoff_is_flat() {
        let policy = RetryPolicy::new(Duration::from_millis(250), 5, Backoff::None);
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(4), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_exhausting_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(10), 5, Backoff::None);

        let result: Result<u32, Boom> = retry(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Boom(n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_if_stops_on_rejected_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(10), 5, Backoff::None);

        let result: Result<(), Boom> = retry_if(
            policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Boom(7)) }
            },
            |_| false,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err(), Boom(7));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_attempts_still_invokes_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(10), 0, Backoff::None);

        let result: Result<(), Boom> = retry(policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Boom(1)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
