//! Result delivery to the caller's `webhookUrl`.
//!
//! [`WebhookDelivery`] POSTs a [`WebhookPayload`] and retries failed
//! attempts with exponential backoff (1 s, 2 s, 4 s) before giving up.

use std::time::Duration;

use dermalens_core::inference::InferenceResponse;
use dermalens_core::types::InferenceId;
use serde::Serialize;

/// Delays before each retry (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Body POSTed to the webhook once a queued job finishes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: InferenceId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<InferenceResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookPayload {
    pub fn completed(job_id: InferenceId, result: InferenceResponse) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(job_id: InferenceId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

pub struct WebhookDelivery {
    client: reqwest::Client,
    retry_delays: Vec<Duration>,
}

impl WebhookDelivery {
    pub fn new() -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            retry_delays: RETRY_DELAYS_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Deliver a payload with retry.
    ///
    /// Makes one attempt plus one retry per configured delay and returns
    /// `Ok(())` on the first success.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let mut delays = self.retry_delays.iter();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.try_send(url, payload).await {
                Ok(()) => {
                    tracing::info!(job_id = %payload.job_id, attempt, "Webhook delivered");
                    return Ok(());
                }
                Err(e) => e,
            };

            match delays.next() {
                Some(delay) => {
                    tracing::warn!(
                        job_id = %payload.job_id,
                        attempt,
                        url,
                        error = %error,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
                None => {
                    tracing::error!(job_id = %payload.job_id, url, error = %error, "Webhook delivery failed after all retries");
                    return Err(error);
                }
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn fast() -> WebhookDelivery {
        WebhookDelivery::new()
            .unwrap()
            .with_retry_delays(vec![Duration::from_millis(1); 3])
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn failed_payload_serializes_camel_case_without_result() {
        let id = InferenceId::nil();
        let json = serde_json::to_value(WebhookPayload::failed(id, "boom")).unwrap();
        assert_eq!(json["jobId"], id.to_string());
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(json.get("result").is_none());
    }

    #[tokio::test]
    async fn retries_until_the_endpoint_accepts() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let counter = counter.clone();
                async move {
                    assert_eq!(body["status"], "failed");
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let base = serve(app).await;

        fast()
            .deliver(&format!("{base}/hook"), &WebhookPayload::failed(InferenceId::nil(), "x"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_retry() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/hook",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_GATEWAY
                }
            }),
        );
        let base = serve(app).await;

        let err = fast()
            .deliver(&format!("{base}/hook"), &WebhookPayload::failed(InferenceId::nil(), "x"))
            .await
            .unwrap_err();

        assert_matches!(err, WebhookError::HttpStatus(502));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
