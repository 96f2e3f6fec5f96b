//! Mapping detector coordinate spaces back onto the original image.
//!
//! Detectors may analyse a resized copy of the source image. A factor of
//! `original / analysed` per axis converts their coordinates back.

use serde::{Deserialize, Serialize};

use crate::detection::ImageDimensions;

/// Per-axis multipliers from detector space to original-image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingFactors {
    pub x: f64,
    pub y: f64,
}

impl Default for ScalingFactors {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ScalingFactors {
    pub const IDENTITY: Self = Self { x: 1.0, y: 1.0 };

    /// Compute factors for a detector that analysed `analysed` pixels of an
    /// image whose true size is `original`.
    ///
    /// Any axis where either side is unknown (zero) gets a factor of `1`.
    pub fn between(original: ImageDimensions, analysed: ImageDimensions) -> Self {
        Self {
            x: axis_factor(original.width, analysed.width),
            y: axis_factor(original.height, analysed.height),
        }
    }
}

fn axis_factor(original: u32, analysed: u32) -> f64 {
    if original == 0 || analysed == 0 {
        1.0
    } else {
        f64::from(original) / f64::from(analysed)
    }
}

/// Factors for all three detector branches, keyed the way they are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchScaling {
    pub acne: ScalingFactors,
    pub redness: ScalingFactors,
    pub wrinkles: ScalingFactors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscaled_analysis_scales_up() {
        let f = ScalingFactors::between(ImageDimensions::new(2000, 1000), ImageDimensions::new(500, 250));
        assert_eq!(f, ScalingFactors { x: 4.0, y: 4.0 });
    }

    #[test]
    fn same_size_is_identity() {
        let dims = ImageDimensions::new(640, 480);
        assert_eq!(ScalingFactors::between(dims, dims), ScalingFactors::IDENTITY);
    }

    #[test]
    fn zero_analysis_dimension_defaults_to_one() {
        let f = ScalingFactors::between(ImageDimensions::new(800, 600), ImageDimensions::new(0, 300));
        assert_eq!(f.x, 1.0);
        assert_eq!(f.y, 2.0);
    }

    #[test]
    fn unknown_original_defaults_to_one() {
        let f = ScalingFactors::between(ImageDimensions::default(), ImageDimensions::new(400, 400));
        assert_eq!(f, ScalingFactors::IDENTITY);
    }
}
