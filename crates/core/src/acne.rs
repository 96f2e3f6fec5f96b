//! Acne lesion counting, severity grading and classification.
//!
//! Detector labels are normalised before bucketing, so `"Papules"`,
//! `"papule"` and `"PAPULES"` all land in the same bucket. Cosmetic labels
//! (freckles, moles, post-acne marks) are dropped before anything is counted.

use serde::{Deserialize, Serialize};

use crate::detection::Prediction;
use crate::types::Severity;

// ---------------------------------------------------------------------------
// Label constants
// ---------------------------------------------------------------------------

/// Labels the detector emits that are not acne lesions.
pub const EXCLUDED_LABELS: &[&str] = &["freckles", "moles", "postacnescar", "postacnespot"];

/// Upper bound (inclusive) of the `Mild` band.
pub const MILD_MAX_LESIONS: u32 = 5;

/// Upper bound (inclusive) of the `Moderate` band.
pub const MODERATE_MAX_LESIONS: u32 = 20;

/// Comedone count at or below which an otherwise clear face is `no-acne`.
pub const NO_ACNE_MAX_COMEDONES: u32 = 2;

/// The six lesion buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LesionKind {
    Comedones,
    Cysts,
    Microcysts,
    Nodules,
    Papules,
    Pustules,
}

impl LesionKind {
    /// Map a raw detector label to a lesion bucket.
    ///
    /// Returns `None` for excluded cosmetic labels and for anything the
    /// detector emits that is not one of the six lesion types.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = normalize_label(label);
        if EXCLUDED_LABELS.contains(&normalized.as_str()) {
            return None;
        }
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        match singular {
            "comedone" => Some(Self::Comedones),
            "cyst" => Some(Self::Cysts),
            "microcyst" => Some(Self::Microcysts),
            "nodule" => Some(Self::Nodules),
            "papule" => Some(Self::Papules),
            "pustule" => Some(Self::Pustules),
            _ => None,
        }
    }
}

/// Lowercase and strip everything that is not alphanumeric.
fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Per-bucket lesion counts. Every bucket is always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcneCounts {
    #[serde(rename = "Comedones")]
    pub comedones: u32,
    #[serde(rename = "Cysts")]
    pub cysts: u32,
    #[serde(rename = "Microcysts")]
    pub microcysts: u32,
    #[serde(rename = "Nodules")]
    pub nodules: u32,
    #[serde(rename = "Papules")]
    pub papules: u32,
    #[serde(rename = "Pustules")]
    pub pustules: u32,
}

impl AcneCounts {
    pub fn total(&self) -> u32 {
        self.comedones + self.cysts + self.microcysts + self.nodules + self.papules + self.pustules
    }

    fn increment(&mut self, kind: LesionKind) {
        let slot = match kind {
            LesionKind::Comedones => &mut self.comedones,
            LesionKind::Cysts => &mut self.cysts,
            LesionKind::Microcysts => &mut self.microcysts,
            LesionKind::Nodules => &mut self.nodules,
            LesionKind::Papules => &mut self.papules,
            LesionKind::Pustules => &mut self.pustules,
        };
        *slot += 1;
    }
}

/// Clinical acne classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcneClassification {
    NoAcne,
    Comedonica,
    Microcistica,
    Papulopustolosa,
    Cistica,
    NoduloCistica,
}

impl AcneClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAcne => "no-acne",
            Self::Comedonica => "comedonica",
            Self::Microcistica => "microcistica",
            Self::Papulopustolosa => "papulopustolosa",
            Self::Cistica => "cistica",
            Self::NoduloCistica => "nodulo-cistica",
        }
    }
}

impl std::fmt::Display for AcneClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics derived from one acne detector response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcneMetrics {
    pub counts: AcneCounts,
    pub total_lesions: u32,
    pub severity: Severity,
    pub classification: AcneClassification,
}

// ---------------------------------------------------------------------------
// Calculators
// ---------------------------------------------------------------------------

/// Count lesions into the six buckets, ignoring excluded and unknown labels.
pub fn count_lesions(predictions: &[Prediction]) -> AcneCounts {
    let mut counts = AcneCounts::default();
    for prediction in predictions {
        if let Some(kind) = LesionKind::from_label(&prediction.class) {
            counts.increment(kind);
        }
    }
    counts
}

/// Grade severity from the total lesion count.
///
/// `0` is `None`, `1..=5` is `Mild`, `6..=20` is `Moderate`, above is `Severe`.
pub fn severity_for_total(total: u32) -> Severity {
    match total {
        0 => Severity::None,
        1..=MILD_MAX_LESIONS => Severity::Mild,
        n if n <= MODERATE_MAX_LESIONS => Severity::Moderate,
        _ => Severity::Severe,
    }
}

/// Classify by priority: nodules, cysts, inflammatory lesions, then the
/// comedone / microcyst comparison.
pub fn classify(counts: &AcneCounts) -> AcneClassification {
    if counts.nodules > 0 {
        return AcneClassification::NoduloCistica;
    }
    if counts.cysts > 0 {
        return AcneClassification::Cistica;
    }
    if counts.papules > 0 || counts.pustules > 0 {
        return AcneClassification::Papulopustolosa;
    }
    if counts.comedones <= NO_ACNE_MAX_COMEDONES && counts.microcysts == 0 {
        return AcneClassification::NoAcne;
    }
    if counts.comedones >= counts.microcysts {
        AcneClassification::Comedonica
    } else {
        AcneClassification::Microcistica
    }
}

/// Run the full acne calculator over a detector prediction list.
///
/// A `no-acne` classification always grades `None`: one or two stray
/// comedones are not graded as acne. Every other classification is graded
/// by [`severity_for_total`].
pub fn compute_acne_metrics(predictions: &[Prediction]) -> AcneMetrics {
    let counts = count_lesions(predictions);
    let total_lesions = counts.total();
    let classification = classify(&counts);
    let severity = match classification {
        AcneClassification::NoAcne => Severity::None,
        _ => severity_for_total(total_lesions),
    };
    AcneMetrics {
        counts,
        total_lesions,
        severity,
        classification,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
