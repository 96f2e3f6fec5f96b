/// Errors raised while talking to an external dependency.
///
/// None of these reach the HTTP caller: the pipeline converts them into
/// fallback values at the call site.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// The HTTP request itself failed (network, DNS, TLS, transport timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The dependency answered with a non-2xx status code.
    #[error("{service} returned HTTP {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The dependency answered 2xx but the body did not match its contract.
    #[error("{service} returned an unexpected payload: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// The source image could not be read as a supported format.
    #[error("Source image is not a readable image: {0}")]
    InvalidImage(String),

    /// No endpoint is configured for this dependency.
    #[error("{0} endpoint is not configured")]
    NotConfigured(&'static str),
}

impl DetectorError {
    /// HTTP status for [`DetectorError::Api`], if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
