//! One inference, end to end.
//!
//! ```text
//! cache lookup ─hit──────────────────────────────────────────────▶ respond
//!      │ miss
//!      ▼
//! fetch source image ─▶ join(acne, redness, wrinkles) ─▶ metrics + scaling
//!                                                          │
//!                          cache write (unless acne fell back)
//!                                                          │
//!                                   recommendations (optional) ─▶ respond
//! ```
//!
//! Every branch of the fan-out resolves to a value: detector errors are
//! turned into fallbacks inside the branch, so the join itself cannot fail.
//! Each stage runs under its own [`Deadlines`] entry; a branch that overruns
//! resolves to its fallback like any other failure.

use std::sync::Arc;

use dermalens_core::acne::compute_acne_metrics;
use dermalens_core::detection::{AcneDetection, RednessDetection, WrinkleDetection};
use dermalens_core::image_source::ValidatedImage;
use dermalens_core::inference::{
    BranchFallbacks, CacheStatus, InferenceRequest, InferenceResponse, InferenceResult,
    RecommendationProfile, Recommendations, RecommendationsMeta,
};
use dermalens_core::redness::compute_redness_metrics;
use dermalens_core::scaling::{BranchScaling, ScalingFactors};
use dermalens_core::wrinkles::compute_wrinkles_metrics;
use dermalens_detectors::{DetectorSet, SourceImage};
use dermalens_store::ResponseCache;
use tokio::time::Instant;

use crate::breaker::FallbackReason;
use crate::config::{Deadlines, PipelineConfig};
use crate::error::PipelineError;
use crate::observer::{BreakerObserver, RetryObserver, TracingObserver};
use crate::registry::{AcneCall, BreakerRegistry};
use crate::retry::{Guarded, RetryPolicy};

/// Output of one fan-out branch and whether it is a fallback.
struct Branch<T> {
    value: T,
    fell_back: bool,
}

impl<T> From<Guarded<T>> for Branch<T> {
    fn from(guarded: Guarded<T>) -> Self {
        let fell_back = guarded.is_fallback();
        Self {
            value: guarded.into_inner(),
            fell_back,
        }
    }
}

pub struct Orchestrator {
    detectors: DetectorSet,
    cache: Arc<ResponseCache>,
    breakers: BreakerRegistry,
    acne_retry: RetryPolicy,
    wrinkle_retry: RetryPolicy,
    deadlines: Deadlines,
    retry_observer: Arc<dyn RetryObserver>,
}

impl Orchestrator {
    /// Build an orchestrator that logs breaker and retry events via `tracing`.
    pub fn new(detectors: DetectorSet, cache: Arc<ResponseCache>, config: &PipelineConfig) -> Self {
        Self::with_observers(
            detectors,
            cache,
            config,
            Arc::new(TracingObserver),
            Arc::new(TracingObserver),
        )
    }

    pub fn with_observers(
        detectors: DetectorSet,
        cache: Arc<ResponseCache>,
        config: &PipelineConfig,
        breaker_observer: Arc<dyn BreakerObserver>,
        retry_observer: Arc<dyn RetryObserver>,
    ) -> Self {
        Self {
            breakers: BreakerRegistry::new(config, cache.clone(), breaker_observer),
            detectors,
            cache,
            acne_retry: config.acne_retry(),
            wrinkle_retry: config.wrinkle_retry(),
            deadlines: config.deadlines.clone(),
            retry_observer,
        }
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run one synchronous inference for an already validated image.
    pub async fn run(
        &self,
        request: &InferenceRequest,
        image: &ValidatedImage,
    ) -> Result<InferenceResponse, PipelineError> {
        let started = Instant::now();
        let cache_key = self.cache.key_for(&image.cache_key());

        if let Some(mut result) = self.cached_result(&cache_key).await {
            result.image_url = request.image_url.clone();
            self.enrich(&mut result, request).await;
            return Ok(respond(result, CacheStatus::Hit, started));
        }

        let fetch = self.detectors.images.fetch(image.url.as_str());
        let source = tokio::time::timeout(self.deadlines.source, fetch)
            .await
            .map_err(|_| PipelineError::SourceDeadline(self.deadlines.source))?
            .map_err(PipelineError::SourceImage)?;

        let (acne, redness, wrinkles) = tokio::join!(
            self.acne_branch(image.url.as_str(), &cache_key),
            self.redness_branch(&source),
            self.wrinkle_branch(&source),
        );

        let mut result = merge(&request.image_url, acne, redness, wrinkles);

        if result.fallbacks.acne {
            tracing::info!(cache_key = %cache_key, "Acne branch fell back, result not cached");
        } else {
            let value = serde_json::to_value(&result)?;
            self.cache.set_default(&cache_key, &value).await;
        }

        let status = if result.fallbacks.acne {
            CacheStatus::Fallback
        } else {
            CacheStatus::Miss
        };
        self.enrich(&mut result, request).await;
        Ok(respond(result, status, started))
    }

    /// Last-resort reconstruction after [`run`](Self::run) failed.
    ///
    /// Only attempted while the acne breaker is open: the result is built
    /// from fallbacks alone (the acne fallback still consults the cache) and
    /// no dependency is called. Returns `None` when the breaker is not open.
    pub async fn recover(
        &self,
        request: &InferenceRequest,
        image: &ValidatedImage,
    ) -> Option<InferenceResponse> {
        if !self.breakers.acne().is_open() {
            return None;
        }
        let started = Instant::now();
        let call = AcneCall {
            image_url: image.url.to_string(),
            cache_key: self.cache.key_for(&image.cache_key()),
        };

        let acne = self
            .breakers
            .acne()
            .fallback(&call, FallbackReason::Open)
            .await
            .unwrap_or_else(|| AcneDetection::unavailable("Acne detection service unavailable"));

        let mut result = merge(
            &request.image_url,
            Branch {
                value: acne,
                fell_back: true,
            },
            Branch {
                value: RednessDetection::empty("Source image unavailable"),
                fell_back: true,
            },
            Branch {
                value: WrinkleDetection::unavailable("Source image unavailable"),
                fell_back: true,
            },
        );
        tracing::warn!(cache_key = %call.cache_key, "Serving reconstructed fallback result");
        self.enrich(&mut result, request).await;
        Some(respond(result, CacheStatus::Fallback, started))
    }

    // ---- fan-out branches ----

    async fn acne_branch(&self, image_url: &str, cache_key: &str) -> Branch<AcneDetection> {
        let call = AcneCall {
            image_url: image_url.to_string(),
            cache_key: cache_key.to_string(),
        };
        let detector = self.detectors.acne.clone();
        let breaker = self.breakers.acne();

        let attempts = self.acne_retry.run(
            breaker,
            call.clone(),
            self.retry_observer.as_ref(),
            |call| {
                let detector = detector.clone();
                let url = call.image_url.clone();
                async move { detector.detect(&url).await }
            },
        );

        let branch = match tokio::time::timeout(self.deadlines.branch, attempts).await {
            Ok(Ok(guarded)) => guarded.into(),
            Ok(Err(e)) => Branch {
                value: AcneDetection::unavailable(e.to_string()),
                fell_back: true,
            },
            Err(_) => {
                tracing::warn!(
                    dependency = breaker.name(),
                    deadline_ms = self.deadlines.branch.as_millis() as u64,
                    "Acne branch overran its deadline"
                );
                Branch {
                    value: breaker
                        .fallback(&call, FallbackReason::Exhausted)
                        .await
                        .unwrap_or_else(|| AcneDetection::unavailable("Acne detection timed out")),
                    fell_back: true,
                }
            }
        };

        if !branch.fell_back {
            self.breakers.remember_acne(cache_key, &branch.value);
        }
        branch
    }

    async fn redness_branch(&self, source: &SourceImage) -> Branch<RednessDetection> {
        let detect = self.detectors.redness.detect(source);
        let error = match tokio::time::timeout(self.deadlines.branch, detect).await {
            Ok(Ok(value)) => {
                return Branch {
                    value,
                    fell_back: false,
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "Redness detection timed out".to_string(),
        };
        tracing::warn!(dependency = "redness-detector", error = %error, "Redness detection failed, using empty result");
        Branch {
            value: RednessDetection::empty(error),
            fell_back: true,
        }
    }

    async fn wrinkle_branch(&self, source: &SourceImage) -> Branch<WrinkleDetection> {
        let detector = self.detectors.wrinkles.clone();
        let breaker = self.breakers.wrinkles();

        let attempts = self.wrinkle_retry.run(
            breaker,
            source.clone(),
            self.retry_observer.as_ref(),
            |image| {
                let detector = detector.clone();
                let image = image.clone();
                async move { detector.detect(&image).await }
            },
        );

        match tokio::time::timeout(self.deadlines.branch, attempts).await {
            Ok(Ok(guarded)) => guarded.into(),
            Ok(Err(e)) => Branch {
                value: WrinkleDetection::unavailable(e.to_string()),
                fell_back: true,
            },
            Err(_) => {
                tracing::warn!(
                    dependency = breaker.name(),
                    deadline_ms = self.deadlines.branch.as_millis() as u64,
                    "Wrinkle branch overran its deadline"
                );
                Branch {
                    value: breaker
                        .fallback(source, FallbackReason::Exhausted)
                        .await
                        .unwrap_or_else(|| WrinkleDetection::unavailable("Wrinkle detection timed out")),
                    fell_back: true,
                }
            }
        }
    }

    // ---- private helpers ----

    async fn cached_result(&self, cache_key: &str) -> Option<InferenceResult> {
        let value = self.cache.get(cache_key).await?;
        match serde_json::from_value(value) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "Ignoring cached entry with unexpected shape");
                None
            }
        }
    }

    /// Attach per-request data that is never cached: caller metadata and
    /// personalised recommendations.
    async fn enrich(&self, result: &mut InferenceResult, request: &InferenceRequest) {
        result.metadata = request.metadata.clone();
        if !request.include_recommendations {
            return;
        }

        let profile = RecommendationProfile::new(
            result.acne_metrics.classification.as_str(),
            result.acne_metrics.severity.as_str(),
            request.user_data.clone().unwrap_or_default(),
        );

        let recommend = self.detectors.recommendations.recommend(&profile);
        let outcome = match tokio::time::timeout(self.deadlines.recommendations, recommend).await {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(_) => Err("Recommendation service timed out".to_string()),
        };

        let (recommendations, meta) = match outcome {
            Ok(recommendations) => (
                recommendations,
                RecommendationsMeta {
                    success: true,
                    error: None,
                    generated_at: chrono::Utc::now(),
                },
            ),
            Err(error) => {
                tracing::warn!(dependency = "recommendation-service", error = %error, "Recommendations failed, using fallback");
                (
                    Recommendations::unavailable(),
                    RecommendationsMeta {
                        success: false,
                        error: Some(error),
                        generated_at: chrono::Utc::now(),
                    },
                )
            }
        };
        result.recommendations = Some(recommendations);
        result.recommendations_meta = Some(meta);
    }
}

/// Combine the three branch outputs with their metrics and scaling factors.
///
/// The acne detector's echoed image size is the reference for every factor.
fn merge(
    image_url: &str,
    acne: Branch<AcneDetection>,
    redness: Branch<RednessDetection>,
    wrinkles: Branch<WrinkleDetection>,
) -> InferenceResult {
    let original = acne.value.image;
    let scaling_factors = BranchScaling {
        acne: ScalingFactors::between(original, acne.value.image),
        redness: ScalingFactors::between(original, redness.value.analysis_dimensions()),
        wrinkles: ScalingFactors::between(original, wrinkles.value.image),
    };

    InferenceResult {
        inference_id: uuid::Uuid::new_v4(),
        image_url: image_url.to_string(),
        acne_metrics: compute_acne_metrics(&acne.value.predictions),
        redness: compute_redness_metrics(&redness.value),
        wrinkles_metrics: compute_wrinkles_metrics(&wrinkles.value.predictions),
        scaling_factors,
        fallbacks: BranchFallbacks {
            acne: acne.fell_back,
            redness: redness.fell_back,
            wrinkles: wrinkles.fell_back,
        },
        roboflow: acne.value,
        wrinkles: wrinkles.value,
        created_at: chrono::Utc::now(),
        metadata: None,
        recommendations: None,
        recommendations_meta: None,
    }
}

fn respond(result: InferenceResult, cache_status: CacheStatus, started: Instant) -> InferenceResponse {
    InferenceResponse {
        result,
        cache_status,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }
}
