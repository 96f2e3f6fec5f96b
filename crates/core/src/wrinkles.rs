//! Wrinkle tallying, severity grading and facial-zone facets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detection::Prediction;
use crate::types::{round2, Severity};

// ---------------------------------------------------------------------------
// Class constants
// ---------------------------------------------------------------------------

pub const CLASS_FOREHEAD: &str = "forehead";
pub const CLASS_BUNNY_LINE: &str = "bunny_line";
pub const CLASS_FROWN: &str = "frown";
pub const CLASS_MARIONETTE_LINE: &str = "marionette_line";
pub const CLASS_MENTAL_CREASE: &str = "mental_crease";
pub const CLASS_NASOLABIAL_FOLD: &str = "nasolabial_fold";
pub const CLASS_NECK_LINES: &str = "neck_lines";
pub const CLASS_PURSE_STRING: &str = "purse_string";
pub const CLASS_CROWS_FEET: &str = "crows_feet";
pub const CLASS_DROOPY_EYELID: &str = "droopy_eyelid";
pub const CLASS_TEAR_TROUGH: &str = "tear_trough";

/// Label the detector uses for non-wrinkle regions.
pub const CLASS_BACKGROUND: &str = "background";

/// Every wrinkle class that is counted.
pub const VALID_CLASSES: &[&str] = &[
    CLASS_FOREHEAD,
    CLASS_BUNNY_LINE,
    CLASS_FROWN,
    CLASS_MARIONETTE_LINE,
    CLASS_MENTAL_CREASE,
    CLASS_NASOLABIAL_FOLD,
    CLASS_NECK_LINES,
    CLASS_PURSE_STRING,
    CLASS_CROWS_FEET,
    CLASS_DROOPY_EYELID,
    CLASS_TEAR_TROUGH,
];

/// Dynamic lines formed by facial expression.
pub const EXPRESSION_LINE_CLASSES: &[&str] = &[
    CLASS_BUNNY_LINE,
    CLASS_FROWN,
    CLASS_MARIONETTE_LINE,
    CLASS_MENTAL_CREASE,
    CLASS_NASOLABIAL_FOLD,
    CLASS_NECK_LINES,
    CLASS_PURSE_STRING,
];

/// Periorbital concerns.
pub const UNDER_EYE_CLASSES: &[&str] = &[CLASS_CROWS_FEET, CLASS_DROOPY_EYELID, CLASS_TEAR_TROUGH];

/// Detections above this confidence count as high-confidence.
pub const HIGH_CONFIDENCE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Metrics derived from one wrinkle detector response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrinklesMetrics {
    /// Count per valid class; all eleven classes are always present.
    pub counts: BTreeMap<String, u32>,
    pub total_predictions: u32,
    pub high_confidence_predictions: u32,
    pub average_confidence: f64,
    pub severity: Severity,
    pub has_forehead_wrinkles: bool,
    pub has_expression_lines: bool,
    pub has_under_eye_concerns: bool,
}

/// Canonicalise a detector label: lowercase, apostrophes dropped, any other
/// separator collapsed to a single underscore.
pub fn normalize_class(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars().filter(|c| *c != '\'') {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Grade severity from the number of detections and their mean confidence.
///
/// Evaluated in order; the first matching rung wins.
pub fn severity_for(total: u32, average_confidence: f64) -> Severity {
    if total == 0 || average_confidence < 0.3 {
        Severity::None
    } else if total <= 3 && average_confidence < 0.6 {
        Severity::Mild
    } else if total <= 8 || average_confidence < 0.7 {
        Severity::Moderate
    } else {
        Severity::Severe
    }
}

fn group_present(counts: &BTreeMap<String, u32>, group: &[&str]) -> bool {
    group
        .iter()
        .map(|class| counts.get(*class).copied().unwrap_or(0))
        .sum::<u32>()
        > 0
}

/// Run the wrinkle calculator over a detector prediction list.
pub fn compute_wrinkles_metrics(predictions: &[Prediction]) -> WrinklesMetrics {
    let mut counts: BTreeMap<String, u32> =
        VALID_CLASSES.iter().map(|c| ((*c).to_string(), 0)).collect();

    let mut total = 0u32;
    let mut high_confidence = 0u32;
    let mut confidence_sum = 0.0;

    for prediction in predictions {
        let class = normalize_class(&prediction.class);
        if class == CLASS_BACKGROUND {
            continue;
        }
        let Some(count) = counts.get_mut(&class) else {
            continue;
        };
        *count += 1;
        total += 1;
        confidence_sum += prediction.confidence;
        if prediction.confidence > HIGH_CONFIDENCE {
            high_confidence += 1;
        }
    }

    let average_confidence = if total == 0 {
        0.0
    } else {
        confidence_sum / f64::from(total)
    };

    WrinklesMetrics {
        severity: severity_for(total, average_confidence),
        has_forehead_wrinkles: group_present(&counts, &[CLASS_FOREHEAD]),
        has_expression_lines: group_present(&counts, EXPRESSION_LINE_CLASSES),
        has_under_eye_concerns: group_present(&counts, UNDER_EYE_CLASSES),
        total_predictions: total,
        high_confidence_predictions: high_confidence,
        average_confidence: round2(average_confidence),
        counts,
    }
}
