//! Observer interfaces for breaker and retry events.
//!
//! The breaker and retry policy call these synchronously and never depend
//! on how events are recorded. [`TracingObserver`] is the production sink.

use std::time::Duration;

use crate::breaker::{CallOutcome, CircuitState};

pub trait BreakerObserver: Send + Sync {
    fn on_state_change(&self, breaker: &str, from: CircuitState, to: CircuitState);
    fn on_outcome(&self, breaker: &str, outcome: CallOutcome, elapsed: Duration);
}

pub trait RetryObserver: Send + Sync {
    /// Called after a failed attempt. `attempt` is 1-based; `remaining` is
    /// the number of attempts still allowed.
    fn on_retry(&self, dependency: &str, attempt: u32, remaining: u32, error: &str);
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BreakerObserver for TracingObserver {
    fn on_state_change(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                tracing::warn!(breaker, from = %from, state = %to, "Circuit breaker opened")
            }
            _ => tracing::info!(breaker, from = %from, state = %to, "Circuit breaker state changed"),
        }
    }

    fn on_outcome(&self, breaker: &str, outcome: CallOutcome, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            CallOutcome::Success => {
                tracing::debug!(breaker, outcome = %outcome, elapsed_ms, "Dependency call succeeded")
            }
            CallOutcome::Rejected => {
                tracing::debug!(breaker, outcome = %outcome, "Dependency call short-circuited")
            }
            CallOutcome::Failure | CallOutcome::Timeout => {
                tracing::warn!(breaker, outcome = %outcome, elapsed_ms, "Dependency call failed")
            }
            CallOutcome::Cancelled => {
                tracing::warn!(breaker, outcome = %outcome, "Dependency call abandoned by its caller")
            }
        }
    }
}

impl RetryObserver for TracingObserver {
    fn on_retry(&self, dependency: &str, attempt: u32, remaining: u32, error: &str) {
        tracing::warn!(dependency, attempt, remaining, error, "Dependency attempt failed");
    }
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BreakerObserver for NoopObserver {
    fn on_state_change(&self, _: &str, _: CircuitState, _: CircuitState) {}
    fn on_outcome(&self, _: &str, _: CallOutcome, _: Duration) {}
}

impl RetryObserver for NoopObserver {
    fn on_retry(&self, _: &str, _: u32, _: u32, _: &str) {}
}
