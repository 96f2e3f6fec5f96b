use std::sync::Arc;

use dermalens_core::image_source::ImageSourcePolicy;
use dermalens_pipeline::Orchestrator;
use dermalens_store::{JobQueue, RateLimiter, RedisStore};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Inference pipeline, owning the process-wide breakers and the cache.
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Trust rules applied to every `imageUrl`.
    pub image_policy: Arc<ImageSourcePolicy>,
    /// Async-mode queue; `None` processes every request inline.
    pub job_queue: Option<Arc<dyn JobQueue>>,
    /// Shared store handle, probed by the health check.
    pub store: Option<RedisStore>,
}
