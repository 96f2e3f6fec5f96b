//! In-process stand-ins for every dependency.
//!
//! Each [`StubDependency`] answers with a scripted reply, counts its calls
//! and can be slowed down, so tests can drive the orchestrator through
//! success, failure and timeout paths without a network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dermalens_core::detection::{
    AcneDetection, ImageDimensions, Prediction, RednessDetection, WrinkleDetection,
};
use dermalens_core::inference::{RecommendationProfile, Recommendations};
use serde_json::json;

use crate::acne::AcneDetector;
use crate::error::DetectorError;
use crate::recommendations::RecommendationService;
use crate::redness::RednessDetector;
use crate::source::{ImageSource, SourceImage};
use crate::wrinkles::WrinkleDetector;
use crate::DetectorSet;

#[derive(Debug, Clone)]
enum Reply<T> {
    Succeed(T),
    Fail(String),
}

/// A dependency that returns a scripted reply.
pub struct StubDependency<T> {
    reply: Mutex<Reply<T>>,
    delay: Mutex<Duration>,
    calls: AtomicU32,
}

impl<T: Clone + Send> StubDependency<T> {
    pub fn succeeding(value: T) -> Self {
        Self {
            reply: Mutex::new(Reply::Succeed(value)),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Mutex::new(Reply::Fail(message.into())),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU32::new(0),
        }
    }

    /// Answer every subsequent call with `value`.
    pub fn succeed(&self, value: T) {
        *self.reply.lock().unwrap_or_else(|p| p.into_inner()) = Reply::Succeed(value);
    }

    /// Fail every subsequent call with an HTTP 503.
    pub fn fail(&self, message: impl Into<String>) {
        *self.reply.lock().unwrap_or_else(|p| p.into_inner()) = Reply::Fail(message.into());
    }

    /// Wait this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<T, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.reply.lock().unwrap_or_else(|p| p.into_inner()).clone();
        match reply {
            Reply::Succeed(value) => Ok(value),
            Reply::Fail(body) => Err(DetectorError::Api {
                service: "stub",
                status: 503,
                body,
            }),
        }
    }
}

#[async_trait]
impl AcneDetector for StubDependency<AcneDetection> {
    async fn detect(&self, _image_url: &str) -> Result<AcneDetection, DetectorError> {
        self.respond().await
    }
}

#[async_trait]
impl RednessDetector for StubDependency<RednessDetection> {
    async fn detect(&self, _image: &SourceImage) -> Result<RednessDetection, DetectorError> {
        self.respond().await
    }
}

#[async_trait]
impl WrinkleDetector for StubDependency<WrinkleDetection> {
    async fn detect(&self, _image: &SourceImage) -> Result<WrinkleDetection, DetectorError> {
        self.respond().await
    }
}

#[async_trait]
impl RecommendationService for StubDependency<Recommendations> {
    async fn recommend(
        &self,
        _profile: &RecommendationProfile,
    ) -> Result<Recommendations, DetectorError> {
        self.respond().await
    }
}

#[async_trait]
impl ImageSource for StubDependency<SourceImage> {
    async fn fetch(&self, _image_url: &str) -> Result<SourceImage, DetectorError> {
        self.respond().await
    }
}

// ---------------------------------------------------------------------------
// Canned payloads
// ---------------------------------------------------------------------------

/// Acne response with one papule, one pustule and a freckle on a 1000x800 image.
pub fn sample_acne() -> AcneDetection {
    AcneDetection {
        predictions: vec![
            Prediction::labelled("Papules", 0.9),
            Prediction::labelled("Pustules", 0.8),
            Prediction::labelled("Freckles", 0.7),
        ],
        image: ImageDimensions::new(1000, 800),
        error: None,
    }
}

/// Redness response: one 100x100 square analysed at 500x400.
pub fn sample_redness() -> RednessDetection {
    RednessDetection {
        num_polygons: 1,
        polygons: vec![vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]]],
        analysis_width: 500,
        analysis_height: 400,
        error: None,
    }
}

/// Wrinkle response with a forehead line and crow's feet analysed at 640x512.
pub fn sample_wrinkles() -> WrinkleDetection {
    WrinkleDetection {
        predictions: vec![
            Prediction::labelled("forehead", 0.8),
            Prediction::labelled("crows_feet", 0.6),
        ],
        image: ImageDimensions::new(640, 512),
        inference_id: Some("stub-wrinkles".into()),
        time: Some(0.1),
        error: None,
    }
}

pub fn sample_recommendations() -> Recommendations {
    Recommendations {
        skincare_routine: vec![json!({"step": "cleanse"}), json!({"step": "treat"})],
        message: None,
    }
}

pub fn sample_image() -> SourceImage {
    SourceImage::from_parts("aW1hZ2U=", ImageDimensions::new(1000, 800), "image/jpeg")
}

// ---------------------------------------------------------------------------
// Stub set
// ---------------------------------------------------------------------------

/// One stub per dependency, all answering with the canned payloads.
#[derive(Clone)]
pub struct StubSet {
    pub acne: Arc<StubDependency<AcneDetection>>,
    pub redness: Arc<StubDependency<RednessDetection>>,
    pub wrinkles: Arc<StubDependency<WrinkleDetection>>,
    pub recommendations: Arc<StubDependency<Recommendations>>,
    pub images: Arc<StubDependency<SourceImage>>,
}

impl StubSet {
    pub fn healthy() -> Self {
        Self {
            acne: Arc::new(StubDependency::succeeding(sample_acne())),
            redness: Arc::new(StubDependency::succeeding(sample_redness())),
            wrinkles: Arc::new(StubDependency::succeeding(sample_wrinkles())),
            recommendations: Arc::new(StubDependency::succeeding(sample_recommendations())),
            images: Arc::new(StubDependency::succeeding(sample_image())),
        }
    }

    pub fn detector_set(&self) -> DetectorSet {
        DetectorSet {
            acne: self.acne.clone(),
            redness: self.redness.clone(),
            wrinkles: self.wrinkles.clone(),
            recommendations: self.recommendations.clone(),
            images: self.images.clone(),
        }
    }
}

impl Default for StubSet {
    fn default() -> Self {
        Self::healthy()
    }
}
