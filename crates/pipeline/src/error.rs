use dermalens_detectors::DetectorError;

/// Failures that escape the orchestrator.
///
/// Detector failures are absorbed into fallbacks and never appear here;
/// only problems that prevent any fan-out at all do.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source image could not be downloaded or is not an image.
    #[error("Source image could not be retrieved: {0}")]
    SourceImage(#[source] DetectorError),

    /// The source image download ran past its deadline.
    #[error("Source image fetch exceeded its {0:?} deadline")]
    SourceDeadline(std::time::Duration),

    /// The merged result could not be encoded for the cache.
    #[error("Result encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
