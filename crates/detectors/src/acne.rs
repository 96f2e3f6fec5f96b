//! Client for the primary (acne) detector.
//!
//! The detector fetches the image itself: the request carries only the API
//! key and the image URL as query parameters, and the response echoes the
//! true image dimensions.

use async_trait::async_trait;
use dermalens_core::detection::AcneDetection;

use crate::config::EndpointConfig;
use crate::error::DetectorError;
use crate::http::parse_response;

const SERVICE: &str = "acne detector";

#[async_trait]
pub trait AcneDetector: Send + Sync {
    async fn detect(&self, image_url: &str) -> Result<AcneDetection, DetectorError>;
}

/// HTTP client for the acne detector.
pub struct AcneClient {
    client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl AcneClient {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(client: reqwest::Client, endpoint: EndpointConfig) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl AcneDetector for AcneClient {
    /// `GET {url}?api_key=..&image=..`; reqwest percent-encodes the image URL.
    async fn detect(&self, image_url: &str) -> Result<AcneDetection, DetectorError> {
        let url = self
            .endpoint
            .url
            .as_deref()
            .ok_or(DetectorError::NotConfigured(SERVICE))?;
        let api_key = self.endpoint.credential.as_deref().unwrap_or_default();

        let response = self
            .client
            .get(url)
            .query(&[("api_key", api_key), ("image", image_url)])
            .send()
            .await?;

        let detection: AcneDetection = parse_response(SERVICE, response).await?;
        tracing::debug!(
            predictions = detection.predictions.len(),
            width = detection.image.width,
            height = detection.image.height,
            "Acne detector responded",
        );
        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::test_support::serve;

    // -- detect --

    #[tokio::test]
    async fn sends_key_and_image_as_query_parameters() {
        let app = Router::new().route(
            "/model/1",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params["api_key"], "secret");
                assert_eq!(params["image"], "https://cdn.example.com/a b.jpg?sig=x&sp=r");
                Json(json!({
                    "predictions": [
                        {"class": "Papules", "confidence": 0.91, "x": 10.0, "y": 12.0, "width": 4.0, "height": 4.0}
                    ],
                    "image": {"width": 1024, "height": 768}
                }))
            }),
        );
        let base = serve(app).await;
        let client = AcneClient::new(EndpointConfig::new(format!("{base}/model/1"), "secret"));

        let detection = client
            .detect("https://cdn.example.com/a b.jpg?sig=x&sp=r")
            .await
            .unwrap();

        assert_eq!(detection.predictions.len(), 1);
        assert_eq!(detection.predictions[0].class, "Papules");
        assert_eq!(detection.image.width, 1024);
        assert_eq!(detection.image.height, 768);
        assert!(detection.error.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let app = Router::new().route(
            "/model/1",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let base = serve(app).await;
        let client = AcneClient::new(EndpointConfig::new(format!("{base}/model/1"), "k"));

        let err = client.detect("https://x/y.jpg").await.unwrap_err();

        assert_matches!(err, DetectorError::Api { status: 502, ref body, .. } if body == "upstream down");
    }

    #[tokio::test]
    async fn unconfigured_endpoint_fails_without_a_request() {
        let client = AcneClient::new(EndpointConfig::default());

        let err = client.detect("https://x/y.jpg").await.unwrap_err();

        assert_matches!(err, DetectorError::NotConfigured(_));
    }
}
