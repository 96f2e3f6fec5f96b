//! Client for the wrinkle detector.

use async_trait::async_trait;
use dermalens_core::detection::WrinkleDetection;

use crate::config::EndpointConfig;
use crate::error::DetectorError;
use crate::http::{parse_response, InlineImageBody};
use crate::source::SourceImage;

const SERVICE: &str = "wrinkle detector";

#[async_trait]
pub trait WrinkleDetector: Send + Sync {
    async fn detect(&self, image: &SourceImage) -> Result<WrinkleDetection, DetectorError>;
}

/// HTTP client for the wrinkle detector: `POST {base64image, code}`.
pub struct WrinkleClient {
    client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl WrinkleClient {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: EndpointConfig) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl WrinkleDetector for WrinkleClient {
    async fn detect(&self, image: &SourceImage) -> Result<WrinkleDetection, DetectorError> {
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

        let detection: WrinkleDetection = parse_response(SERVICE, response).await?;
        tracing::debug!(
            predictions = detection.predictions.len(),
            inference_id = detection.inference_id.as_deref().unwrap_or("-"),
            "Wrinkle detector responded",
        );
        Ok(detection)
    }
}
