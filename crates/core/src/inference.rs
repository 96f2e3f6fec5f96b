//! Request, job and merged-result models for one inference.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::acne::AcneMetrics;
use crate::detection::{AcneDetection, WrinkleDetection};
use crate::redness::RednessMetrics;
use crate::scaling::BranchScaling;
use crate::types::{InferenceId, Timestamp};
use crate::wrinkles::WrinklesMetrics;

/// Free-form demographic / preference fields supplied by the caller.
pub type UserData = Map<String, Value>;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Body of `POST /infer`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    #[serde(default)]
    pub image_url: String,
    /// Process inline (`true`) or enqueue for the worker (`false`).
    #[serde(default = "default_sync")]
    pub sync: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub user_data: Option<UserData>,
    #[serde(default)]
    pub include_recommendations: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_sync() -> bool {
    true
}

impl InferenceRequest {
    /// Convenience constructor for a synchronous request on `image_url`.
    pub fn for_image(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            sync: true,
            ..Default::default()
        }
    }
}

/// Descriptor pushed onto the job queue for asynchronous processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: InferenceId,
    pub image_url: String,
    pub user_id: Option<String>,
    pub webhook_url: Option<String>,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub user_data: Option<UserData>,
    #[serde(default)]
    pub include_recommendations: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl JobDescriptor {
    pub fn from_request(request: &InferenceRequest) -> Self {
        Self {
            job_id: uuid::Uuid::now_v7(),
            image_url: request.image_url.clone(),
            user_id: request.user_id.clone(),
            webhook_url: request.webhook_url.clone(),
            timestamp: chrono::Utc::now(),
            user_data: request.user_data.clone(),
            include_recommendations: request.include_recommendations,
            metadata: request.metadata.clone(),
        }
    }

    /// Rebuild the synchronous request the worker executes.
    pub fn to_request(&self) -> InferenceRequest {
        InferenceRequest {
            image_url: self.image_url.clone(),
            sync: true,
            user_id: self.user_id.clone(),
            webhook_url: self.webhook_url.clone(),
            user_data: self.user_data.clone(),
            include_recommendations: self.include_recommendations,
            metadata: self.metadata.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Flattened profile sent to the recommendation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationProfile {
    pub acne_type: String,
    pub acne_severity: String,
    #[serde(flatten)]
    pub user_data: UserData,
}

impl RecommendationProfile {
    /// Keys the computed profile owns; caller data may not shadow them.
    pub const RESERVED_KEYS: [&'static str; 2] = ["acne_type", "acne_severity"];

    /// Build a profile, dropping caller fields that would collide with the
    /// computed acne fields once flattened.
    pub fn new(
        acne_type: impl Into<String>,
        acne_severity: impl Into<String>,
        mut user_data: UserData,
    ) -> Self {
        for key in Self::RESERVED_KEYS {
            user_data.remove(key);
        }
        Self {
            acne_type: acne_type.into(),
            acne_severity: acne_severity.into(),
            user_data,
        }
    }
}

/// Routine returned by the recommendation service, or its fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    #[serde(default)]
    pub skincare_routine: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Recommendations {
    /// Empty routine with an explanation, used when the service fails.
    pub fn unavailable() -> Self {
        Self {
            skincare_routine: Vec::new(),
            message: Some(
                "Personalised recommendations are temporarily unavailable. Please try again later."
                    .into(),
            ),
        }
    }
}

/// Outcome of the recommendation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationsMeta {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Merged result
// ---------------------------------------------------------------------------

/// Which branches produced a fallback instead of live detector output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFallbacks {
    pub acne: bool,
    pub redness: bool,
    pub wrinkles: bool,
}

impl BranchFallbacks {
    pub fn any(&self) -> bool {
        self.acne || self.redness || self.wrinkles
    }
}

/// The merged, metrics-enriched result of one inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub inference_id: InferenceId,
    pub image_url: String,
    pub roboflow: AcneDetection,
    pub acne_metrics: AcneMetrics,
    pub redness: RednessMetrics,
    pub wrinkles: WrinkleDetection,
    pub wrinkles_metrics: WrinklesMetrics,
    pub scaling_factors: BranchScaling,
    pub fallbacks: BranchFallbacks,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Recommendations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations_meta: Option<RecommendationsMeta>,
}

/// How a response was produced, reported in the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Fallback,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Fallback => "FALLBACK",
        }
    }
}

/// Body returned for a synchronous inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    #[serde(flatten)]
    pub result: InferenceResult,
    pub cache_status: CacheStatus,
    pub processing_time_ms: u64,
}
