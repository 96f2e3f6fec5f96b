//! Bounded retry around a breaker-guarded call.
//!
//! Each attempt goes through the breaker, so a breaker that opens part-way
//! through a sequence cuts it short. A rejection from an open breaker is
//! never retried: it goes straight to the breaker's fallback.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::breaker::{BreakerError, CircuitBreaker, FallbackReason};
use crate::observer::RetryObserver;

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// No delay between attempts.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = Duration::from_millis(base_ms as u64).min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let half = capped.as_millis() as u64 / 2;
        Duration::from_millis(half + rand::rng().random_range(0..=half))
    }
}

/// Outcome of a guarded call: live dependency output or a fallback value.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    Live(T),
    Fallback(T),
}

impl<T> Guarded<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Guarded::Fallback(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Guarded::Live(value) | Guarded::Fallback(value) => value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Call `op` through `breaker` up to `max_attempts` times.
    ///
    /// Every failed attempt is reported to `observer`. When all attempts
    /// fail, or the breaker rejects the call, the breaker's fallback answers
    /// instead; without a fallback the last error is returned.
    pub async fn run<A, T, E, F, Fut>(
        &self,
        breaker: &CircuitBreaker<A, T>,
        args: A,
        observer: &dyn RetryObserver,
        mut op: F,
    ) -> Result<Guarded<T>, BreakerError<E>>
    where
        A: Send + Sync,
        E: std::fmt::Display,
        F: FnMut(&A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match breaker.call(|| op(&args)).await {
                Ok(value) => return Ok(Guarded::Live(value)),
                Err(BreakerError::Open(name)) => {
                    return match breaker.fallback(&args, FallbackReason::Open).await {
                        Some(value) => Ok(Guarded::Fallback(value)),
                        None => Err(BreakerError::Open(name)),
                    };
                }
                Err(e) => e,
            };

            let remaining = attempts - attempt;
            observer.on_retry(breaker.name(), attempt, remaining, &error.to_string());

            if remaining == 0 {
                return match breaker.fallback(&args, FallbackReason::Exhausted).await {
                    Some(value) => Ok(Guarded::Fallback(value)),
                    None => Err(error),
                };
            }

            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::breaker::{BreakerConfig, Fallback};
    use crate::observer::recording::RecordingObserver;

    struct Sentinel;

    #[async_trait]
    impl Fallback<(), &'static str> for Sentinel {
        async fn fallback(&self, _: &(), reason: FallbackReason) -> &'static str {
            match reason {
                FallbackReason::Open => "open",
                FallbackReason::Exhausted => "exhausted",
            }
        }
    }

    fn breaker(volume_threshold: u32) -> CircuitBreaker<(), &'static str> {
        CircuitBreaker::new(
            "stub",
            BreakerConfig {
                timeout: Duration::from_secs(1),
                volume_threshold,
                ..BreakerConfig::default()
            },
            Arc::new(RecordingObserver::default()),
        )
        .with_fallback(Arc::new(Sentinel))
    }

    fn fixed(delay_ms: u64) -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(delay_ms),
            max_delay: Duration::from_millis(delay_ms),
            multiplier: 1.0,
            jitter: false,
        }
    }

    // -- backoff --

    #[test]
    fn exponential_delay_is_capped() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_half_and_full_delay() {
        let backoff = Backoff {
            jitter: true,
            ..fixed(400)
        };
        for _ in 0..50 {
            let d = backoff.delay_for_attempt(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    // -- run --

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_and_reports_each_failure() {
        let b = breaker(100);
        let observer = RecordingObserver::default();
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::new(3, fixed(10))
            .run(&b, (), &observer, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("flaky")
                    } else {
                        Ok("live")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Guarded::Live("live"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observer.retries(), vec![(1, 2), (2, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_fall_back() {
        let b = breaker(100);
        let observer = RecordingObserver::default();
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::new(3, fixed(10))
            .run(&b, (), &observer, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<&'static str, _>("down") }
            })
            .await
            .unwrap();

        assert_eq!(result, Guarded::Fallback("exhausted"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observer.retries(), vec![(1, 2), (2, 1), (3, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_the_whole_sequence() {
        let b = breaker(2);
        let observer = RecordingObserver::default();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, fixed(1_000));

        // Two failures trip the breaker on the second attempt; the third
        // attempt is rejected and answered by the fallback.
        let first = policy
            .run(&b, (), &observer, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<&'static str, _>("down") }
            })
            .await
            .unwrap();
        assert_eq!(first, Guarded::Fallback("open"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let started = Instant::now();
        let second = policy
            .run(&b, (), &observer, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &'static str>("live") }
            })
            .await
            .unwrap();

        assert_eq!(second, Guarded::Fallback("open"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(observer.retries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn without_fallback_the_last_error_is_returned() {
        let b = CircuitBreaker::<(), u32>::new(
            "bare",
            BreakerConfig {
                volume_threshold: 100,
                ..BreakerConfig::default()
            },
            Arc::new(RecordingObserver::default()),
        );
        let observer = RecordingObserver::default();

        let err = RetryPolicy::new(2, Backoff::none())
            .run(&b, (), &observer, |_| async { Err::<u32, _>("nope") })
            .await
            .unwrap_err();

        assert_matches!(err, BreakerError::Inner("nope"));
    }
}
