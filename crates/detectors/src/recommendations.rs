//! Client for the downstream recommendation service.

use async_trait::async_trait;
use dermalens_core::inference::{RecommendationProfile, Recommendations};

use crate::error::DetectorError;
use crate::http::parse_response;

const SERVICE: &str = "recommendation service";

#[async_trait]
pub trait RecommendationService: Send + Sync {
    async fn recommend(
        &self,
        profile: &RecommendationProfile,
    ) -> Result<Recommendations, DetectorError>;
}

/// HTTP client posting the flattened profile to the recommendation service.
pub struct RecommendationClient {
    client: reqwest::Client,
    url: Option<String>,
}

impl RecommendationClient {
    pub fn new(url: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: Option<String>) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl RecommendationService for RecommendationClient {
    async fn recommend(
        &self,
        profile: &RecommendationProfile,
    ) -> Result<Recommendations, DetectorError> {
        let url = self
            .url
            .as_deref()
            .ok_or(DetectorError::NotConfigured(SERVICE))?;

        let response = self.client.post(url).json(profile).send().await?;
        let recommendations: Recommendations = parse_response(SERVICE, response).await?;
        tracing::debug!(
            steps = recommendations.skincare_routine.len(),
            acne_type = %profile.acne_type,
            "Recommendations received",
        );
        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::test_support::serve;

    fn profile() -> RecommendationProfile {
        let mut user_data = Map::new();
        user_data.insert("age".into(), json!(29));
        user_data.insert("skin_type".into(), json!("oily"));
        RecommendationProfile {
            acne_type: "papulopustolosa".into(),
            acne_severity: "Mild".into(),
            user_data,
        }
    }

    #[tokio::test]
    async fn posts_flattened_profile() {
        let app = Router::new().route(
            "/recommend",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["acne_type"], "papulopustolosa");
                assert_eq!(body["acne_severity"], "Mild");
                assert_eq!(body["age"], 29);
                assert_eq!(body["skin_type"], "oily");
                Json(json!({"skincare_routine": [{"step": "cleanse"}, {"step": "treat"}]}))
            }),
        );
        let base = serve(app).await;
        let client = RecommendationClient::new(Some(format!("{base}/recommend")));

        let recommendations = client.recommend(&profile()).await.unwrap();

        assert_eq!(recommendations.skincare_routine.len(), 2);
        assert!(recommendations.message.is_none());
    }

    #[tokio::test]
    async fn unset_url_is_not_configured() {
        let client = RecommendationClient::new(None);
        assert_matches!(
            client.recommend(&profile()).await,
            Err(DetectorError::NotConfigured(_))
        );
    }
}
