//! Resilient fan-out over the external detectors.
//!
//! [`Orchestrator`] runs one inference: cache lookup, a concurrent call to
//! each detector, metric derivation and the optional recommendation step.
//! The acne and wrinkle calls are wrapped in a [`RetryPolicy`] over a
//! [`CircuitBreaker`]; both live in a [`BreakerRegistry`] shared by every
//! request.

pub mod breaker;
pub mod config;
pub mod error;
pub mod observer;
pub mod orchestrator;
pub mod registry;
pub mod retry;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerSnapshot, BreakerStatus, CallOutcome, CircuitBreaker,
    CircuitState, Fallback, FallbackReason,
};
pub use config::{ConfigError, Deadlines, PipelineConfig};
pub use error::PipelineError;
pub use observer::{BreakerObserver, NoopObserver, RetryObserver, TracingObserver};
pub use orchestrator::Orchestrator;
pub use registry::{BreakerRegistry, ACNE_BREAKER, WRINKLE_BREAKER};
pub use retry::{Backoff, Guarded, RetryPolicy};
