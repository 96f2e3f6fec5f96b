//! Client for the redness (erythema) detector.

use async_trait::async_trait;
use dermalens_core::detection::RednessDetection;

use crate::config::EndpointConfig;
use crate::error::DetectorError;
use crate::http::{parse_response, InlineImageBody};
use crate::source::SourceImage;

const SERVICE: &str = "redness detector";

#[async_trait]
pub trait RednessDetector: Send + Sync {
    async fn detect(&self, image: &SourceImage) -> Result<RednessDetection, DetectorError>;
}

/// HTTP client for the redness detector: `POST {base64image, code}`.
pub struct RednessClient {
    client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl RednessClient {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: EndpointConfig) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl RednessDetector for RednessClient {
    async fn detect(&self, image: &SourceImage) -> Result<RednessDetection, DetectorError> {
        let url = self
            .endpoint
            .url
            .as_deref()
            .ok_or(DetectorError::NotConfigured(SERVICE))?;

        let response = self
            .client
            .post(url)
            .json(&InlineImageBody {
                base64image: &image.base64,
                code: self.endpoint.credential.as_deref().unwrap_or_default(),
            })
            .send()
            .await?;

        let detection: RednessDetection = parse_response(SERVICE, response).await?;
        tracing::debug!(
            polygons = detection.polygons.len(),
            analysis_width = detection.analysis_width,
            analysis_height = detection.analysis_height,
            "Redness detector responded",
        );
        Ok(detection)
    }
}
