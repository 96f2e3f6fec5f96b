//! Per-dependency circuit breaker.
//!
//! `Closed` passes calls through and records each outcome into a rolling
//! window of time buckets. Once the window holds at least
//! `volume_threshold` calls and its error percentage exceeds
//! `error_threshold_percentage`, the breaker moves to `Open` and rejects
//! every call without touching the dependency. After `reset_timeout` the
//! next call is let through as the single `HalfOpen` trial: success closes
//! the breaker, failure re-opens it. A call whose future is dropped before
//! it finishes is recorded as a failure, so a cancelled trial re-opens the
//! breaker instead of holding the trial slot.
//!
//! State lives behind a [`std::sync::Mutex`] that is never held across an
//! await, so every outcome is applied atomically.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dermalens_core::types::Timestamp;
use serde::Serialize;
use tokio::time::Instant;

use crate::observer::BreakerObserver;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default error percentage above which the breaker opens.
pub const DEFAULT_ERROR_THRESHOLD_PCT: f64 = 50.0;

/// Default time an open breaker waits before allowing a trial call.
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;

/// Default minimum number of calls in the window before the breaker can trip.
pub const DEFAULT_VOLUME_THRESHOLD: u32 = 5;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Deadline for a single wrapped call. Exceeding it counts as a failure.
    pub timeout: Duration,
    pub error_threshold_percentage: f64,
    pub reset_timeout: Duration,
    /// Length of the rolling statistics window.
    pub rolling_window: Duration,
    /// Number of buckets the window is split into.
    pub window_buckets: u32,
    pub volume_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            error_threshold_percentage: DEFAULT_ERROR_THRESHOLD_PCT,
            reset_timeout: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
            rolling_window: Duration::from_secs(10),
            window_buckets: 10,
            volume_threshold: DEFAULT_VOLUME_THRESHOLD,
        }
    }
}

impl BreakerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn bucket_width(&self) -> Duration {
        let buckets = self.window_buckets.max(1);
        (self.rolling_window / buckets).max(Duration::from_millis(1))
    }
}

// ---------------------------------------------------------------------------
// Public state and outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single call through the breaker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Short-circuited by an open breaker; the dependency was not called.
    Rejected,
    /// The caller went away before the call finished. Counts as a failure.
    Cancelled,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Timeout => "timeout",
            CallOutcome::Rejected => "rejected",
            CallOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

/// Why a fallback is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The breaker rejected the call without invoking the dependency.
    Open,
    /// The wrapped call failed on every allowed attempt.
    Exhausted,
}

/// Point-in-time view of a breaker, for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub window_requests: u32,
    pub window_failures: u32,
    pub error_percentage: f64,
    pub last_transition_at: Timestamp,
}

/// Fallback strategy invoked with the same arguments as the wrapped call.
#[async_trait]
pub trait Fallback<A, T>: Send + Sync
where
    A: Send + Sync,
{
    async fn fallback(&self, args: &A, reason: FallbackReason) -> T;
}

// ---------------------------------------------------------------------------
// Rolling window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

#[derive(Debug, Default)]
struct RollingWindow {
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn record(&mut self, now: Instant, failed: bool, config: &BreakerConfig) {
        self.expire(now, config.rolling_window);

        let width = config.bucket_width();
        let needs_bucket = self
            .buckets
            .back()
            .map_or(true, |b| now.duration_since(b.started) >= width);
        if needs_bucket {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if failed {
                bucket.failures += 1;
            } else {
                bucket.successes += 1;
            }
        }
    }

    fn expire(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.buckets.front() {
            if now.duration_since(front.started) >= window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn totals(&self) -> (u32, u32) {
        self.buckets.iter().fold((0, 0), |(requests, failures), b| {
            (requests + b.successes + b.failures, failures + b.failures)
        })
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

fn error_percentage(requests: u32, failures: u32) -> f64 {
    if requests == 0 {
        0.0
    } else {
        f64::from(failures) / f64::from(requests) * 100.0
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

impl Phase {
    fn public(self) -> CircuitState {
        match self {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

struct BreakerInner {
    phase: Phase,
    window: RollingWindow,
    last_transition_at: Timestamp,
}

impl BreakerInner {
    /// Move to `next`, returning the `(from, to)` pair for observers.
    fn transition(&mut self, next: Phase) -> Option<(CircuitState, CircuitState)> {
        let from = self.phase.public();
        self.phase = next;
        let to = next.public();
        if from == to {
            return None;
        }
        self.last_transition_at = chrono::Utc::now();
        Some((from, to))
    }
}

/// Permission to run one call, handed out by `admit`.
///
/// A permit dropped before its outcome is recorded (the caller's future was
/// cancelled mid-call) counts as a failure. For the half-open trial this
/// re-opens the breaker; otherwise the trial slot would stay claimed forever.
struct Permit<'a, A, T>
where
    A: Send + Sync,
{
    breaker: &'a CircuitBreaker<A, T>,
    trial: bool,
    recorded: bool,
}

impl<A, T> Permit<'_, A, T>
where
    A: Send + Sync,
{
    fn record(mut self, outcome: CallOutcome) {
        self.recorded = true;
        self.breaker.record(self.trial, outcome);
    }
}

impl<A, T> Drop for Permit<'_, A, T>
where
    A: Send + Sync,
{
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        self.breaker.record(self.trial, CallOutcome::Cancelled);
        self.breaker
            .observer
            .on_outcome(&self.breaker.name, CallOutcome::Cancelled, Duration::ZERO);
    }
}

/// Circuit breaker guarding calls that take `A` and produce `T`.
pub struct CircuitBreaker<A, T>
where
    A: Send + Sync,
{
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    fallback: Option<Arc<dyn Fallback<A, T>>>,
    observer: Arc<dyn BreakerObserver>,
}

impl<A, T> CircuitBreaker<A, T>
where
    A: Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        observer: Arc<dyn BreakerObserver>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                phase: Phase::Closed,
                window: RollingWindow::default(),
                last_transition_at: chrono::Utc::now(),
            }),
            fallback: None,
            observer,
        }
    }

    /// Attach the fallback strategy used by [`fire`](Self::fire) and
    /// [`fallback`](Self::fallback).
    pub fn with_fallback(mut self, fallback: Arc<dyn Fallback<A, T>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Current state. An open breaker whose reset timeout has elapsed still
    /// reports `Open` until the next call claims the trial.
    pub fn state(&self) -> CircuitState {
        self.lock().phase.public()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        inner.window.expire(Instant::now(), self.config.rolling_window);
        let (requests, failures) = inner.window.totals();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.phase.public(),
            window_requests: requests,
            window_failures: failures,
            error_percentage: dermalens_core::types::round2(error_percentage(requests, failures)),
            last_transition_at: inner.last_transition_at,
        }
    }

    /// Run `op` through the breaker once, bounded by the configured timeout.
    pub async fn call<F, Fut, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.admit() else {
            self.observer
                .on_outcome(&self.name, CallOutcome::Rejected, Duration::ZERO);
            return Err(BreakerError::Open(self.name.clone()));
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.config.timeout, op()).await;
        let elapsed = started.elapsed();

        let (outcome, result) = match result {
            Ok(Ok(value)) => (CallOutcome::Success, Ok(value)),
            Ok(Err(e)) => (CallOutcome::Failure, Err(BreakerError::Inner(e))),
            Err(_) => (
                CallOutcome::Timeout,
                Err(BreakerError::Timeout(self.config.timeout)),
            ),
        };
        permit.record(outcome);
        self.observer.on_outcome(&self.name, outcome, elapsed);
        result
    }

    /// Like [`call`](Self::call), but an open breaker or failed call is
    /// answered by the fallback strategy when one is configured.
    pub async fn fire<F, Fut, E>(&self, args: A, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce(&A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.call(|| op(&args)).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let reason = match &e {
                    BreakerError::Open(_) => FallbackReason::Open,
                    _ => FallbackReason::Exhausted,
                };
                match self.fallback(&args, reason).await {
                    Some(value) => Ok(value),
                    None => Err(e),
                }
            }
        }
    }

    /// Invoke the fallback strategy, if any.
    pub async fn fallback(&self, args: &A, reason: FallbackReason) -> Option<T> {
        match &self.fallback {
            Some(strategy) => Some(strategy.fallback(args, reason).await),
            None => None,
        }
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Option<Permit<'_, A, T>> {
        let now = Instant::now();
        let (trial, change) = {
            let mut inner = self.lock();
            match inner.phase {
                Phase::Closed => (Some(false), None),
                Phase::Open { until } if now >= until => {
                    let change = inner.transition(Phase::HalfOpen {
                        trial_in_flight: true,
                    });
                    (Some(true), change)
                }
                Phase::Open { .. } => (None, None),
                Phase::HalfOpen {
                    trial_in_flight: true,
                } => (None, None),
                Phase::HalfOpen {
                    trial_in_flight: false,
                } => {
                    inner.phase = Phase::HalfOpen {
                        trial_in_flight: true,
                    };
                    (Some(true), None)
                }
            }
        };
        self.notify(change);
        trial.map(|trial| Permit {
            breaker: self,
            trial,
            recorded: false,
        })
    }

    fn record(&self, trial: bool, outcome: CallOutcome) {
        let now = Instant::now();
        let failed = outcome != CallOutcome::Success;
        let change = {
            let mut inner = self.lock();
            if trial {
                if failed {
                    inner.transition(Phase::Open {
                        until: now + self.config.reset_timeout,
                    })
                } else {
                    inner.window.clear();
                    inner.transition(Phase::Closed)
                }
            } else {
                inner.window.record(now, failed, &self.config);
                let (requests, failures) = inner.window.totals();
                let tripped = matches!(inner.phase, Phase::Closed)
                    && requests >= self.config.volume_threshold
                    && error_percentage(requests, failures)
                        > self.config.error_threshold_percentage;
                if tripped {
                    inner.transition(Phase::Open {
                        until: now + self.config.reset_timeout,
                    })
                } else {
                    None
                }
            }
        };
        self.notify(change);
    }

    fn notify(&self, change: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = change {
            self.observer.on_state_change(&self.name, from, to);
        }
    }
}

/// Type-erased view used by the registry to list breakers of any call type.
pub trait BreakerStatus: Send + Sync {
    fn name(&self) -> &str;
    fn state(&self) -> CircuitState;
    fn snapshot(&self) -> BreakerSnapshot;
}

impl<A, T> BreakerStatus for CircuitBreaker<A, T>
where
    A: Send + Sync,
    T: Send + Sync,
{
    fn name(&self) -> &str {
        CircuitBreaker::name(self)
    }

    fn state(&self) -> CircuitState {
        CircuitBreaker::state(self)
    }

    fn snapshot(&self) -> BreakerSnapshot {
        CircuitBreaker::snapshot(self)
    }
}
