//! Source-image retrieval.
//!
//! The redness and wrinkle detectors take the image inline as base64, so
//! the orchestrator downloads it once, checks that it really is an image,
//! and hands the same [`SourceImage`] to both branches.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dermalens_core::detection::ImageDimensions;

use crate::error::DetectorError;
use crate::http::ensure_success;

const SERVICE: &str = "image source";

/// Largest image accepted for inline analysis.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// A downloaded image, ready to be sent inline to a detector.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Base64 (standard alphabet, padded) encoding of the raw bytes.
    pub base64: Arc<str>,
    /// Dimensions read from the image header.
    pub dimensions: ImageDimensions,
    /// MIME type of the detected format, e.g. `image/jpeg`.
    pub content_type: &'static str,
    pub byte_len: usize,
}

impl SourceImage {
    /// Assemble an already-encoded image.
    pub fn from_parts(
        base64: impl Into<Arc<str>>,
        dimensions: ImageDimensions,
        content_type: &'static str,
    ) -> Self {
        let base64 = base64.into();
        Self {
            byte_len: base64.len() / 4 * 3,
            base64,
            dimensions,
            content_type,
        }
    }

    /// Sniff the format and dimensions of `bytes` without decoding pixels.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DetectorError> {
        if bytes.is_empty() {
            return Err(DetectorError::InvalidImage("empty body".into()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(DetectorError::InvalidImage(format!(
                "{} bytes exceeds the {MAX_IMAGE_BYTES} byte limit",
                bytes.len()
            )));
        }

        let reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DetectorError::InvalidImage(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| DetectorError::InvalidImage("unrecognised image format".into()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| DetectorError::InvalidImage(e.to_string()))?;

        Ok(Self {
            base64: STANDARD.encode(bytes).into(),
            dimensions: ImageDimensions::new(width, height),
            content_type: format.to_mime_type(),
            byte_len: bytes.len(),
        })
    }
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, image_url: &str) -> Result<SourceImage, DetectorError>;
}

/// Downloads source images over HTTP(S).
pub struct HttpImageSource {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageSource {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    /// Lower the download cap below [`MAX_IMAGE_BYTES`].
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.min(MAX_IMAGE_BYTES);
        self
    }

    /// Read the body chunk by chunk, giving up as soon as it passes the cap.
    /// `Content-Length` is only a hint: chunked responses carry none.
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>, DetectorError> {
        let limit = self.max_bytes;
        if let Some(len) = response.content_length() {
            if len > limit as u64 {
                return Err(DetectorError::InvalidImage(format!(
                    "declared length {len} exceeds the {limit} byte limit"
                )));
            }
        }

        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(DetectorError::InvalidImage(format!(
                    "body exceeds the {limit} byte limit"
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

impl Default for HttpImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, image_url: &str) -> Result<SourceImage, DetectorError> {
        let response = self.client.get(image_url).send().await?;
        let response = ensure_success(SERVICE, response).await?;
        let bytes = self.read_capped(response).await?;
        let image = SourceImage::from_bytes(&bytes)?;
        tracing::debug!(
            bytes = image.byte_len,
            width = image.dimensions.width,
            height = image.dimensions.height,
            content_type = image.content_type,
            "Source image fetched",
        );
        Ok(image)
    }
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::test_support::serve;

    // -- from_bytes --

    #[test]
    fn reads_dimensions_and_format_from_header() {
        let bytes = png_bytes(32, 24);

        let image = SourceImage::from_bytes(&bytes).unwrap();

        assert_eq!(image.dimensions, ImageDimensions::new(32, 24));
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.byte_len, bytes.len());
        assert_eq!(STANDARD.decode(image.base64.as_bytes()).unwrap(), bytes);
    }

    #[test]
    fn rejects_non_image_bytes() {
        let err = SourceImage::from_bytes(b"<html>not an image</html>").unwrap_err();
        assert_matches!(err, DetectorError::InvalidImage(_));
    }

    #[test]
    fn rejects_empty_body() {
        assert_matches!(
            SourceImage::from_bytes(&[]),
            Err(DetectorError::InvalidImage(_))
        );
    }

    // -- fetch --

    #[tokio::test]
    async fn fetches_and_encodes_image() {
        let bytes = png_bytes(8, 6);
        let app = Router::new().route(
            "/face.png",
            get(move || {
                let bytes = bytes.clone();
                async move { ([(header::CONTENT_TYPE, "image/png")], bytes) }
            }),
        );
        let base = serve(app).await;

        let image = HttpImageSource::new()
            .fetch(&format!("{base}/face.png"))
            .await
            .unwrap();

        assert_eq!(image.dimensions, ImageDimensions::new(8, 6));
    }

    #[tokio::test]
    async fn missing_image_is_an_api_error() {
        let app = Router::new().route("/gone.png", get(|| async { StatusCode::NOT_FOUND }));
        let base = serve(app).await;

        let err = HttpImageSource::new()
            .fetch(&format!("{base}/gone.png"))
            .await
            .unwrap_err();

        assert_matches!(err, DetectorError::Api { status: 404, .. });
    }

    #[tokio::test]
    async fn chunked_body_over_the_cap_is_cut_off() {
        let app = Router::new().route(
            "/endless.png",
            get(|| async {
                let chunks = futures::stream::iter(
                    (0..64).map(|_| Ok::<_, std::io::Error>(vec![0u8; 1024])),
                );
                Body::from_stream(chunks)
            }),
        );
        let base = serve(app).await;

        let err = HttpImageSource::new()
            .with_max_bytes(4 * 1024)
            .fetch(&format!("{base}/endless.png"))
            .await
            .unwrap_err();

        assert_matches!(err, DetectorError::InvalidImage(msg) if msg.contains("4096 byte limit"));
    }

    #[tokio::test]
    async fn chunked_image_under_the_cap_is_accepted() {
        let bytes = png_bytes(4, 4);
        let app = Router::new().route(
            "/small.png",
            get(move || {
                let parts: Vec<_> = bytes.chunks(16).map(|c| Ok::<_, std::io::Error>(c.to_vec())).collect();
                async move { Body::from_stream(futures::stream::iter(parts)) }
            }),
        );
        let base = serve(app).await;

        let image = HttpImageSource::new()
            .with_max_bytes(4 * 1024)
            .fetch(&format!("{base}/small.png"))
            .await
            .unwrap();

        assert_eq!(image.dimensions, ImageDimensions::new(4, 4));
    }
}
