//! Fixed-window request limiter keyed by client identity.
//!
//! Each identity owns a counter whose TTL is armed on the first increment
//! of a window. The increment and TTL read happen in one atomic round-trip
//! against the counter store. If the store is unreachable the limiter fails
//! open: the request is allowed and a warning is logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dermalens_core::types::Timestamp;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::redis_store::RedisStore;

/// Counter state returned by a single increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub ttl: Duration,
}

/// Store holding per-identity window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, arming a `window` TTL on first use.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;
}

// ---------------------------------------------------------------------------
// Redis counter store
// ---------------------------------------------------------------------------

/// INCR + PTTL in one script so no other client can interleave.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Redis-backed counters shared by every service instance.
pub struct RedisCounterStore {
    store: RedisStore,
    script: redis::Script,
}

impl RedisCounterStore {
    pub fn new(store: RedisStore) -> Self {
        Self {
            store,
            script: redis::Script::new(INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let window_ms = window.as_millis().max(1) as u64;
        let script = &self.script;
        self.store
            .run(|mut conn| async move {
                let (count, ttl_ms): (u64, i64) = script
                    .key(key)
                    .arg(window_ms)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(WindowCount {
                    count,
                    ttl: Duration::from_millis(ttl_ms.max(0) as u64),
                })
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// In-memory counter store
// ---------------------------------------------------------------------------

/// Process-local counters, used when no shared store is configured.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, (_, reset_at)| *reset_at > now);

        let (count, reset_at) = windows
            .entry(key.to_string())
            .or_insert_with(|| (0, now + window));
        *count += 1;

        Ok(WindowCount {
            count: *count,
            ttl: reset_at.saturating_duration_since(now),
        })
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Result of one limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
    /// Time until the window resets.
    pub retry_after: Duration,
}

impl RateLimitDecision {
    fn open(limit: u32, window: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: timestamp_after(window),
            retry_after: window,
        }
    }
}

fn timestamp_after(delay: Duration) -> Timestamp {
    chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Gate at the front door. Shared across requests via `Arc`.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
    bypass: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            key_prefix: "dermalens:ratelimit".to_string(),
            bypass: false,
        }
    }

    /// Limiter that allows everything (test mode).
    pub fn bypass() -> Self {
        Self {
            bypass: true,
            ..Self::new(Arc::new(MemoryCounterStore::new()))
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Count one request for `identity` and decide whether it may proceed.
    pub async fn check_and_increment(
        &self,
        identity: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        if self.bypass {
            return RateLimitDecision::open(limit, window);
        }

        let key = format!("{}:{}", self.key_prefix, identity);
        match self.store.increment(&key, window).await {
            Ok(WindowCount { count, ttl }) => {
                let used = u32::try_from(count).unwrap_or(u32::MAX);
                let decision = RateLimitDecision {
                    allowed: used <= limit,
                    limit,
                    remaining: limit.saturating_sub(used),
                    reset_at: timestamp_after(ttl),
                    retry_after: ttl,
                };
                if !decision.allowed {
                    tracing::info!(identity, count, limit, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                tracing::warn!(identity, error = %e, "Rate limit store unavailable, allowing request");
                RateLimitDecision::open(limit, window)
            }
        }
    }
}
