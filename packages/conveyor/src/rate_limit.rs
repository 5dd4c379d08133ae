//! Token-bucket rate limiter.
//!
//! Bounds calls into a quota-constrained partner API. Callers suspend on
//! [`RateLimiter::acquire`] instead of receiving rejections, so bursts are
//! smeared across refill windows rather than bounced.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: u32,
    /// Start of the current refill window.
    window_started: Instant,
}

/// A token bucket granting `refill` tokens per fixed `window`, holding at
/// most `capacity` tokens.
///
/// Waiters sleep until the next window boundary and then re-contend for the
/// lock. tokio's `Mutex` queues waiters fairly, so service is starvation-free
/// while refills continue; strict FIFO across refill boundaries is not
/// guaranteed and not required.
pub struct RateLimiter {
    capacity: u32,
    refill: u32,
    window: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    ///
    /// # Panics
    ///
    /// Panics if `capacity`, `refill`, or `window` is zero.
    pub fn new(capacity: u32, refill: u32, window: Duration) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        assert!(refill > 0, "refill must be positive");
        assert!(!window.is_zero(), "window must be positive");
        Self {
            capacity,
            refill,
            window,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                window_started: Instant::now(),
            }),
        }
    }

    /// Credit any refill windows that elapsed since the last observation.
    fn advance(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.window_started);
        let windows = (elapsed.as_nanos() / self.window.as_nanos()) as u32;
        if windows > 0 {
            bucket.tokens = bucket
                .tokens
                .saturating_add(windows.saturating_mul(self.refill))
                .min(self.capacity);
            bucket.window_started += self.window * windows;
        }
    }

    /// Consume one token, suspending until a refill makes one available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                self.advance(&mut bucket, now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                (bucket.window_started + self.window).saturating_duration_since(now)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume one token if available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.advance(&mut bucket, Instant::now());
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens available at this instant, after crediting elapsed refills.
    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.advance(&mut bucket, Instant::now());
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fifty_first_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(50, 50, Duration::from_secs(60));

        let start = Instant::now();
        for _ in 0..50 {
            limiter.acquire().await;
        }
        // The first 50 are served from the initial bucket with no waiting.
        assert_eq!(Instant::now() - start, Duration::ZERO);

        limiter.acquire().await;
        // The 51st resolves only after a full refill interval.
        assert_eq!(Instant::now() - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_does_not_block() {
        let limiter = RateLimiter::new(2, 2, Duration::from_secs(10));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let limiter = RateLimiter::new(3, 3, Duration::from_secs(1));
        // Idle for many windows; the bucket must not exceed capacity.
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(limiter.available().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_are_all_served() {
        let limiter = Arc::new(RateLimiter::new(1, 1, Duration::from_secs(1)));

        // Drain the bucket, then queue ten waiters.
        limiter.acquire().await;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
            }));
        }

        // One token per window; every waiter completes within ten windows.
        let deadline = Instant::now() + Duration::from_secs(11);
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(Instant::now() <= deadline);
    }
}
