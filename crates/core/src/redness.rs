//! Redness coverage from detector polygons.
//!
//! Coverage is the summed shoelace area of every polygon as a percentage of
//! the analysed region, rounded to two decimals.

use serde::{Deserialize, Serialize};

use crate::detection::{Polygon, RednessDetection};
use crate::types::round2;

/// Coverage percentage above which erythema is flagged.
pub const ERYTHEMA_THRESHOLD_PERC: f64 = 10.0;

/// Metrics derived from one redness detector response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RednessMetrics {
    pub redness_perc: f64,
    pub erythema: bool,
    pub num_polygons: usize,
    pub polygons: Vec<Polygon>,
    pub analysis_width: u32,
    pub analysis_height: u32,
}

/// Area of a simple polygon by the shoelace formula.
///
/// The vertex list is treated as a closed cycle; the last vertex connects
/// back to the first. Fewer than three vertices enclose no area.
pub fn polygon_area(vertices: &[[f64; 2]]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let twice_area: f64 = vertices
        .iter()
        .zip(vertices.iter().cycle().skip(1))
        .map(|([x1, y1], [x2, y2])| x1 * y2 - x2 * y1)
        .sum();
    twice_area.abs() / 2.0
}

/// Percentage of a `width` x `height` region covered by `polygons`.
///
/// A zero-area region yields `0.0` instead of dividing by zero.
pub fn redness_percentage(polygons: &[Polygon], width: u32, height: u32) -> f64 {
    let region = f64::from(width) * f64::from(height);
    if region <= 0.0 {
        return 0.0;
    }
    let covered: f64 = polygons.iter().map(|p| polygon_area(p)).sum();
    round2(covered / region * 100.0)
}

/// Run the redness calculator over a detector response.
pub fn compute_redness_metrics(detection: &RednessDetection) -> RednessMetrics {
    let redness_perc = redness_percentage(
        &detection.polygons,
        detection.analysis_width,
        detection.analysis_height,
    );
    RednessMetrics {
        redness_perc,
        erythema: redness_perc > ERYTHEMA_THRESHOLD_PERC,
        num_polygons: detection.num_polygons,
        polygons: detection.polygons.clone(),
        analysis_width: detection.analysis_width,
        analysis_height: detection.analysis_height,
    }
}
