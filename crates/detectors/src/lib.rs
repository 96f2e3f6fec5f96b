//! HTTP clients for the external services the orchestrator depends on.
//!
//! Each dependency sits behind an async trait so the pipeline can be driven
//! by stubs in tests. The concrete clients share one [`reqwest::Client`]
//! built from [`DetectorConfig`].

pub mod acne;
pub mod config;
pub mod error;
mod http;
pub mod recommendations;
pub mod redness;
pub mod source;
pub mod stub;
pub mod wrinkles;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use acne::{AcneClient, AcneDetector};
pub use config::{DetectorConfig, EndpointConfig};
pub use error::DetectorError;
pub use recommendations::{RecommendationClient, RecommendationService};
pub use redness::{RednessClient, RednessDetector};
pub use source::{HttpImageSource, ImageSource, SourceImage};
pub use wrinkles::{WrinkleClient, WrinkleDetector};

/// The full set of outbound dependencies, as trait objects.
#[derive(Clone)]
pub struct DetectorSet {
    pub acne: Arc<dyn AcneDetector>,
    pub redness: Arc<dyn RednessDetector>,
    pub wrinkles: Arc<dyn WrinkleDetector>,
    pub recommendations: Arc<dyn RecommendationService>,
    pub images: Arc<dyn ImageSource>,
}

impl DetectorSet {
    /// Build HTTP clients for every dependency, sharing one connection pool.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            acne: Arc::new(AcneClient::with_client(client.clone(), config.acne.clone())),
            redness: Arc::new(RednessClient::with_client(
                client.clone(),
                config.redness.clone(),
            )),
            wrinkles: Arc::new(WrinkleClient::with_client(
                client.clone(),
                config.wrinkles.clone(),
            )),
            recommendations: Arc::new(RecommendationClient::with_client(
                client.clone(),
                config.recommendation_url.clone(),
            )),
            images: Arc::new(HttpImageSource::with_client(client)),
        })
    }
}
