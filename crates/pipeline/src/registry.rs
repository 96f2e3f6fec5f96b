//! Process-wide breakers, built once by the composition root.
//!
//! The registry is cheap to clone and is shared by every request, which is
//! what makes the breaker windows span requests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dermalens_core::detection::{AcneDetection, WrinkleDetection};
use dermalens_detectors::SourceImage;
use dermalens_store::ResponseCache;
use indexmap::IndexMap;

use crate::breaker::{BreakerSnapshot, BreakerStatus, CircuitBreaker, Fallback, FallbackReason};
use crate::config::PipelineConfig;
use crate::observer::BreakerObserver;

pub const ACNE_BREAKER: &str = "acne-detector";
pub const WRINKLE_BREAKER: &str = "wrinkle-detector";

const ACNE_UNAVAILABLE: &str = "Acne detection service unavailable";
const WRINKLE_UNAVAILABLE: &str = "Wrinkle detection service unavailable";

/// Number of images whose last live acne detection is kept in memory.
pub const LAST_GOOD_CAPACITY: usize = 500;

/// Arguments of a guarded acne detector call.
#[derive(Debug, Clone)]
pub struct AcneCall {
    pub image_url: String,
    /// Cache key of the merged result for this image.
    pub cache_key: String,
}

pub type AcneBreaker = CircuitBreaker<AcneCall, AcneDetection>;
pub type WrinkleBreaker = CircuitBreaker<SourceImage, WrinkleDetection>;

// ---------------------------------------------------------------------------
// Fallback strategies
// ---------------------------------------------------------------------------

/// Serves the last live acne detection seen for the same image.
///
/// The orchestrator only falls back after a cache miss, so the merged-result
/// cache rarely holds the image at that point. Live detections are therefore
/// remembered here, in a bounded map keyed by the image's cache key, and
/// outlive the merged entry's TTL. The shared cache is still consulted
/// second, for results another instance wrote in the meantime.
pub struct LastGoodAcne {
    recent: Mutex<IndexMap<String, AcneDetection>>,
    capacity: usize,
    cache: Arc<ResponseCache>,
}

impl LastGoodAcne {
    pub fn new(cache: Arc<ResponseCache>, capacity: usize) -> Self {
        Self {
            recent: Mutex::new(IndexMap::new()),
            capacity: capacity.max(1),
            cache,
        }
    }

    /// Record a live detection for `cache_key`, evicting the oldest image
    /// once over capacity.
    pub fn remember(&self, cache_key: &str, detection: &AcneDetection) {
        let mut recent = self.lock();
        recent.shift_remove(cache_key);
        recent.insert(cache_key.to_string(), detection.clone());
        while recent.len() > self.capacity {
            recent.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn recall(&self, cache_key: &str) -> Option<AcneDetection> {
        self.lock().get(cache_key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, AcneDetection>> {
        self.recent.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn from_shared_cache(&self, cache_key: &str) -> Option<AcneDetection> {
        self.cache
            .get(cache_key)
            .await
            .and_then(|merged| merged.get("roboflow").cloned())
            .and_then(|raw| serde_json::from_value::<AcneDetection>(raw).ok())
    }
}

#[async_trait]
impl Fallback<AcneCall, AcneDetection> for LastGoodAcne {
    async fn fallback(&self, call: &AcneCall, reason: FallbackReason) -> AcneDetection {
        if let Some(detection) = self.recall(&call.cache_key) {
            tracing::info!(cache_key = %call.cache_key, ?reason, "Serving last live acne detection");
            return detection;
        }
        match self.from_shared_cache(&call.cache_key).await {
            Some(detection) => {
                tracing::info!(cache_key = %call.cache_key, ?reason, "Serving cached acne detection");
                detection
            }
            None => {
                tracing::warn!(cache_key = %call.cache_key, ?reason, "Acne detection unavailable");
                AcneDetection::unavailable(ACNE_UNAVAILABLE)
            }
        }
    }
}

/// Always answers with the empty-predictions sentinel.
pub struct WrinkleSentinel;

#[async_trait]
impl Fallback<SourceImage, WrinkleDetection> for WrinkleSentinel {
    async fn fallback(&self, _image: &SourceImage, reason: FallbackReason) -> WrinkleDetection {
        tracing::warn!(?reason, "Wrinkle detection unavailable");
        WrinkleDetection::unavailable(WRINKLE_UNAVAILABLE)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BreakerRegistry {
    acne: Arc<AcneBreaker>,
    wrinkles: Arc<WrinkleBreaker>,
    last_good_acne: Arc<LastGoodAcne>,
}

impl BreakerRegistry {
    pub fn new(
        config: &PipelineConfig,
        cache: Arc<ResponseCache>,
        observer: Arc<dyn BreakerObserver>,
    ) -> Self {
        let last_good_acne = Arc::new(LastGoodAcne::new(cache, LAST_GOOD_CAPACITY));
        let acne = CircuitBreaker::new(ACNE_BREAKER, config.acne_breaker.clone(), observer.clone())
            .with_fallback(last_good_acne.clone());
        let wrinkles = CircuitBreaker::new(WRINKLE_BREAKER, config.wrinkle_breaker.clone(), observer)
            .with_fallback(Arc::new(WrinkleSentinel));

        Self {
            acne: Arc::new(acne),
            wrinkles: Arc::new(wrinkles),
            last_good_acne,
        }
    }

    /// Keep a live acne detection for the acne fallback.
    pub fn remember_acne(&self, cache_key: &str, detection: &AcneDetection) {
        self.last_good_acne.remember(cache_key, detection);
    }

    pub fn acne(&self) -> &AcneBreaker {
        &self.acne
    }

    pub fn wrinkles(&self) -> &WrinkleBreaker {
        &self.wrinkles
    }

    /// Every breaker, in a stable order.
    pub fn all(&self) -> Vec<&dyn BreakerStatus> {
        vec![self.acne.as_ref(), self.wrinkles.as_ref()]
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.all().into_iter().map(|b| b.snapshot()).collect()
    }
}
