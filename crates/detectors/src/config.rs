use std::time::Duration;

/// Default transport timeout for outbound detector calls.
///
/// The per-dependency breaker deadline is usually tighter; this only caps a
/// call that is not wrapped in a breaker (redness, recommendations, image
/// fetch).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 45;

/// Location of one external dependency plus its credential.
///
/// The credential is the acne detector's `api_key` query parameter, or the
/// `code` body field of the redness and wrinkle detectors.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    pub url: Option<String>,
    pub credential: Option<String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            credential: Some(credential.into()),
        }
    }

    fn from_env(url_var: &str, credential_var: &str) -> Self {
        Self {
            url: non_empty_var(url_var),
            credential: non_empty_var(credential_var),
        }
    }
}

/// Outbound dependency configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub acne: EndpointConfig,
    pub redness: EndpointConfig,
    pub wrinkles: EndpointConfig,
    /// Unset means recommendations always fall back.
    pub recommendation_url: Option<String>,
    pub http_timeout: Duration,
}

impl DetectorConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `ACNE_DETECTOR_URL`          | unset   |
    /// | `ACNE_API_KEY`               | unset   |
    /// | `REDNESS_DETECTOR_URL`       | unset   |
    /// | `REDNESS_API_CODE`           | unset   |
    /// | `WRINKLE_DETECTOR_URL`       | unset   |
    /// | `WRINKLE_API_CODE`           | unset   |
    /// | `RECOMMENDATION_URL`         | unset   |
    /// | `DETECTOR_HTTP_TIMEOUT_SECS` | `45`    |
    pub fn from_env() -> Self {
        let http_timeout = std::env::var("DETECTOR_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Self {
            acne: EndpointConfig::from_env("ACNE_DETECTOR_URL", "ACNE_API_KEY"),
            redness: EndpointConfig::from_env("REDNESS_DETECTOR_URL", "REDNESS_API_CODE"),
            wrinkles: EndpointConfig::from_env("WRINKLE_DETECTOR_URL", "WRINKLE_API_CODE"),
            recommendation_url: non_empty_var("RECOMMENDATION_URL"),
            http_timeout: Duration::from_secs(http_timeout),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
