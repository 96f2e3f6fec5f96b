//! Raw payloads returned by the external detectors.
//!
//! These mirror the detectors' wire formats. Every field the detectors may
//! omit carries a serde default so a sparse response still deserializes.
//! Each payload also has a sentinel constructor used when the detector is
//! unavailable, so a failed branch still yields a well-formed value.

use serde::{Deserialize, Serialize};

/// Pixel dimensions of an image as reported by a detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Area in square pixels. Zero when either side is unknown.
    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// A single bounding-box detection (acne and wrinkle detectors share this shape).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Prediction {
    /// Build a prediction carrying only a label and confidence.
    pub fn labelled(class: impl Into<String>, confidence: f64) -> Self {
        Self {
            class: class.into(),
            confidence,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Acne detector
// ---------------------------------------------------------------------------

/// Response of the acne (primary) detector.
///
/// `image` echoes the true dimensions of the source image, which is why the
/// orchestrator uses it as the reference for every scaling factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcneDetection {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub image: ImageDimensions,
    /// Set only on sentinel results produced by a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AcneDetection {
    /// Empty-predictions sentinel returned when the detector is unreachable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            predictions: Vec::new(),
            image: ImageDimensions::default(),
            error: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Redness detector
// ---------------------------------------------------------------------------

/// A polygon as a list of `[x, y]` vertices.
pub type Polygon = Vec<[f64; 2]>;

/// Response of the redness detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RednessDetection {
    #[serde(default)]
    pub num_polygons: usize,
    #[serde(default)]
    pub polygons: Vec<Polygon>,
    #[serde(default)]
    pub analysis_width: u32,
    #[serde(default)]
    pub analysis_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RednessDetection {
    /// Zero-area sentinel substituted when the redness call fails.
    pub fn empty(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn analysis_dimensions(&self) -> ImageDimensions {
        ImageDimensions::new(self.analysis_width, self.analysis_height)
    }
}

// ---------------------------------------------------------------------------
// Wrinkle detector
// ---------------------------------------------------------------------------

/// Response of the wrinkle detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrinkleDetection {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub image: ImageDimensions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WrinkleDetection {
    /// Empty-predictions sentinel returned when the detector is unreachable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acne_detection_tolerates_sparse_payload() {
        let json = serde_json::json!({
            "predictions": [{ "class": "Papules" }],
        });
        let parsed: AcneDetection = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.predictions.len(), 1);
        assert_eq!(parsed.predictions[0].confidence, 0.0);
        assert_eq!(parsed.image, ImageDimensions::default());
        assert!(parsed.error.is_none());
    }

    #[test]
    fn redness_detection_parses_polygons() {
        let json = serde_json::json!({
            "num_polygons": 1,
            "polygons": [[[0, 0], [10, 0], [10, 10]]],
            "analysis_width": 640,
            "analysis_height": 480,
        });
        let parsed: RednessDetection = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.polygons[0][1], [10.0, 0.0]);
        assert_eq!(parsed.analysis_dimensions(), ImageDimensions::new(640, 480));
    }

    #[test]
    fn sentinels_carry_reason_and_no_data() {
        let acne = AcneDetection::unavailable("service unavailable");
        assert!(acne.predictions.is_empty());
        assert_eq!(acne.error.as_deref(), Some("service unavailable"));

        let redness = RednessDetection::empty("timeout");
        assert_eq!(redness.num_polygons, 0);
        assert!(redness.polygons.is_empty());

        let wrinkles = WrinkleDetection::unavailable("breaker open");
        assert!(wrinkles.predictions.is_empty());
    }

    #[test]
    fn error_field_omitted_when_absent() {
        let json = serde_json::to_value(AcneDetection::default()).unwrap();
        assert!(json.get("error").is_none());
    }
}
