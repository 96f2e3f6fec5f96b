//! Two-tier response cache.
//!
//! The primary tier is the shared store (TTL-native, visible to every
//! instance). The local tier is a bounded in-process map used whenever the
//! primary tier misses or errors. Writes go to both tiers; reads try the
//! primary first.
//!
//! The local tier evicts its oldest entries once over capacity and purges
//! expired entries on every write.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::redis_store::RedisStore;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default TTL of a cached merged result.
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Default capacity of the local fallback tier.
pub const DEFAULT_LOCAL_CAPACITY: usize = 500;

/// Default TTL cap of the local fallback tier.
pub const DEFAULT_LOCAL_TTL_SECS: u64 = 3_600;

/// Cache tuning, loaded from the environment.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub local_capacity: usize,
    pub local_ttl: Duration,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            local_ttl: Duration::from_secs(DEFAULT_LOCAL_TTL_SECS),
            key_prefix: "dermalens:inference".to_string(),
        }
    }
}

impl CacheConfig {
    /// Load cache configuration from environment variables.
    ///
    /// | Env Var                 | Default  |
    /// |-------------------------|----------|
    /// | `CACHE_TTL_SECS`        | `86400`  |
    /// | `CACHE_LOCAL_CAPACITY`  | `500`    |
    /// | `CACHE_LOCAL_TTL_SECS`  | `3600`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_secs("CACHE_TTL_SECS").unwrap_or(defaults.ttl),
            local_capacity: std::env::var("CACHE_LOCAL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.local_capacity),
            local_ttl: env_secs("CACHE_LOCAL_TTL_SECS").unwrap_or(defaults.local_ttl),
            key_prefix: defaults.key_prefix,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Primary tier
// ---------------------------------------------------------------------------

/// Network-accessible, TTL-native primary tier.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    /// Delete every key matching a glob `pattern`; returns how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError>;
}

#[async_trait]
impl PrimaryStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run(|mut conn| async move {
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let secs = ttl.as_secs().max(1);
        self.run(|mut conn| async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        self.run(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut deleted: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(200)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                    deleted += removed;
                }
                if next == 0 {
                    return Ok(deleted);
                }
                cursor = next;
            }
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Local tier
// ---------------------------------------------------------------------------

struct LocalEntry {
    value: Value,
    expires_at: Instant,
}

/// Bounded, insertion-ordered in-process fallback map.
struct LocalTier {
    entries: Mutex<IndexMap<String, LocalEntry>>,
    capacity: usize,
    max_ttl: Duration,
}

impl LocalTier {
    fn new(capacity: usize, max_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            capacity: capacity.max(1),
            max_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, LocalEntry>> {
        // A poisoned map only means a panic mid-insert; the data is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.shift_remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.lock();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);

        entries.shift_remove(key);
        entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: now + ttl.min(self.max_ttl),
            },
        );

        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }

    fn invalidate(&self, pattern: &Regex) -> u64 {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern.is_match(key));
        (before - entries.len()) as u64
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Compile a Redis-style glob into an anchored regex, so the local tier
/// drops the same keys `SCAN MATCH` finds in the primary.
///
/// Supported syntax:
///
/// - `*` any run of characters, `?` exactly one
/// - `[abc]`, `[a-z]` and negated `[^abc]` classes
/// - `\x` matches `x` literally, inside or outside a class
///
/// An unterminated or empty class and a trailing lone `\` are rejected.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, StoreError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '\\' => push_literal(&mut expr, escaped_char(&mut chars)?),
            '[' => push_class(&mut expr, &mut chars)?,
            other => push_literal(&mut expr, other),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StoreError::Pattern(e.to_string()))
}

fn push_literal(expr: &mut String, c: char) {
    let mut buf = [0u8; 4];
    expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn escaped_char(chars: &mut std::str::Chars<'_>) -> Result<char, StoreError> {
    chars
        .next()
        .ok_or_else(|| StoreError::Pattern("pattern ends with a lone '\\'".into()))
}

/// Translate a class body up to its closing `]`. A bare `-` between two
/// members forms a range.
fn push_class(expr: &mut String, chars: &mut std::str::Chars<'_>) -> Result<(), StoreError> {
    let unterminated = || StoreError::Pattern("unterminated '[' class".into());
    expr.push('[');
    let mut members = 0usize;
    loop {
        match chars.next().ok_or_else(unterminated)? {
            ']' if members == 0 => return Err(StoreError::Pattern("empty '[]' class".into())),
            ']' => break,
            '^' if members == 0 && !expr.ends_with("[^") => expr.push('^'),
            '\\' => {
                push_literal(expr, escaped_char(chars)?);
                members += 1;
            }
            '-' if members > 0 => expr.push('-'),
            other => {
                push_literal(expr, other);
                members += 1;
            }
        }
    }
    expr.push(']');
    Ok(())
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

/// Merged-result cache with a shared primary tier and a local fallback.
pub struct ResponseCache {
    primary: Option<Arc<dyn PrimaryStore>>,
    local: LocalTier,
    config: CacheConfig,
}

impl ResponseCache {
    /// Cache backed by a primary store with the local tier as fallback.
    pub fn new(primary: Arc<dyn PrimaryStore>, config: CacheConfig) -> Self {
        Self {
            local: LocalTier::new(config.local_capacity, config.local_ttl),
            primary: Some(primary),
            config,
        }
    }

    /// Cache with no shared store; every operation uses the local tier.
    pub fn local_only(config: CacheConfig) -> Self {
        Self {
            local: LocalTier::new(config.local_capacity, config.local_ttl),
            primary: None,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Namespaced cache key for a request fingerprint.
    pub fn key_for(&self, fingerprint: &str) -> String {
        format!("{}:{}", self.config.key_prefix, fingerprint)
    }

    /// Number of entries currently held by the local tier.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Look a key up, primary tier first.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(primary) = &self.primary {
            match primary.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(value) => {
                        tracing::debug!(cache_key = key, tier = "primary", "Cache hit");
                        return Some(value);
                    }
                    Err(e) => {
                        tracing::warn!(cache_key = key, error = %e, "Discarding undecodable cache entry");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(cache_key = key, error = %e, "Primary cache read failed, using local tier");
                }
            }
        }

        let value = self.local.get(key);
        if value.is_some() {
            tracing::debug!(cache_key = key, tier = "local", "Cache hit");
        }
        value
    }

    /// Store a value in both tiers.
    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) {
        self.local.set(key, value.clone(), ttl);

        let Some(primary) = &self.primary else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(cache_key = key, error = %e, "Cache value not serializable");
                return;
            }
        };
        if let Err(e) = primary.set_ex(key, &raw, ttl).await {
            tracing::warn!(cache_key = key, error = %e, "Primary cache write failed, kept in local tier");
        }
    }

    /// Store a value with the configured default TTL.
    pub async fn set_default(&self, key: &str, value: &Value) {
        self.set(key, value, self.config.ttl).await;
    }

    /// Remove every entry whose key matches the glob `pattern` from both tiers.
    ///
    /// Returns the number of entries removed. A primary-tier failure is
    /// logged and only the local removals are counted.
    pub async fn invalidate(&self, pattern: &str) -> Result<u64, StoreError> {
        let matcher = glob_to_regex(pattern)?;
        let mut removed = self.local.invalidate(&matcher);

        if let Some(primary) = &self.primary {
            match primary.delete_matching(pattern).await {
                Ok(n) => removed = removed.max(n),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "Primary cache invalidation failed");
                }
            }
        }

        tracing::info!(pattern, removed, "Cache invalidated");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
