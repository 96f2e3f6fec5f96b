//! Shared-store access for the inference service.
//!
//! - [`RedisStore`] -- connection handle to the shared Redis instance.
//! - [`cache::ResponseCache`] -- two-tier merged-result cache.
//! - [`rate_limit::RateLimiter`] -- fixed-window request counter per client.
//! - [`queue::JobQueue`] -- asynchronous job hand-off to the worker.

pub mod cache;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod redis_store;

pub use cache::{CacheConfig, PrimaryStore, ResponseCache};
pub use error::StoreError;
pub use queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
pub use rate_limit::{
    CounterStore, MemoryCounterStore, RateLimitDecision, RateLimiter, RedisCounterStore,
};
pub use redis_store::RedisStore;

/// Open a Redis handle from a connection URL.
///
/// Opening does not connect; call [`health_check`] to verify reachability.
pub fn connect(redis_url: &str) -> Result<RedisStore, StoreError> {
    RedisStore::open(redis_url)
}

/// Verify the shared store answers a `PING`.
pub async fn health_check(store: &RedisStore) -> Result<(), StoreError> {
    store.ping().await
}
