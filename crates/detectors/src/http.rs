//! Response helpers shared by every client.

use serde::de::DeserializeOwned;

use crate::error::DetectorError;

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`DetectorError::Api`] carrying the status
/// and body text on failure.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, DetectorError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(DetectorError::Api {
            service,
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Check the status code and deserialize the JSON body into `T`.
pub(crate) async fn parse_response<T: DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<T, DetectorError> {
    let response = ensure_success(service, response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| DetectorError::Decode {
        service,
        message: e.to_string(),
    })
}

/// Body shared by the detectors that take the image inline.
#[derive(Debug, serde::Serialize)]
pub(crate) struct InlineImageBody<'a> {
    pub base64image: &'a str,
    pub code: &'a str,
}
