//! Image-reference validation.
//!
//! A request names its image by URL. Production only trusts object-storage
//! hosts; other environments additionally accept any public URL whose path
//! ends in an image extension so test fixtures can be used directly.
//!
//! URLs carrying a shared-access token (`sig` query parameter) must grant
//! read permission (`r` in `sp`) and must not be past their `se` expiry.
//! URLs without a token are treated as public.
//!
//! The cache key of a storage URL ignores its query string, since that only
//! carries the access token. A public URL keeps its query, which may select
//! a different image.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

use crate::error::CoreError;
use crate::types::{AppEnv, Timestamp};

/// Default trusted storage host suffix.
pub const DEFAULT_TRUSTED_HOST: &str = ".blob.core.windows.net";

static IMAGE_EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|webp|gif|bmp)$").expect("valid regex")
});

/// Split a comma-separated host list, dropping blanks.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

/// Which image references the service accepts.
#[derive(Debug, Clone)]
pub struct ImageSourcePolicy {
    /// Host names (exact) or suffixes (leading `.`) of trusted storage.
    pub trusted_hosts: Vec<String>,
    /// Accept any http(s) URL with an image extension.
    pub allow_public_images: bool,
}

/// Shared-access token parameters found on an image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub permissions: String,
    pub expires_at: Option<Timestamp>,
}

/// An image reference that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub url: Url,
    pub token: Option<AccessToken>,
    /// Host matched a trusted storage entry.
    pub trusted_storage: bool,
}

impl ValidatedImage {
    /// Stable cache fingerprint. The fragment is always dropped; the query
    /// string only for trusted storage, so two signed URLs for the same blob
    /// share one key.
    pub fn cache_key(&self) -> String {
        if self.trusted_storage {
            normalized_url(&self.url)
        } else {
            let mut url = self.url.clone();
            url.set_fragment(None);
            url.to_string()
        }
    }
}

impl ImageSourcePolicy {
    /// Production policy: trusted storage hosts only.
    pub fn production(trusted_hosts: Vec<String>) -> Self {
        Self {
            trusted_hosts,
            allow_public_images: false,
        }
    }

    /// Non-production policy: trusted hosts plus public image URLs.
    pub fn permissive(trusted_hosts: Vec<String>) -> Self {
        Self {
            trusted_hosts,
            allow_public_images: true,
        }
    }

    /// Policy for a deployment environment: production is strict, every
    /// other environment is permissive.
    pub fn for_env(env: AppEnv, trusted_hosts: Vec<String>) -> Self {
        if env.is_production() {
            Self::production(trusted_hosts)
        } else {
            Self::permissive(trusted_hosts)
        }
    }

    /// Validate a raw image reference against the current time.
    pub fn validate(&self, raw: &str) -> Result<ValidatedImage, CoreError> {
        self.validate_at(raw, chrono::Utc::now())
    }

    /// Validate a raw image reference as of `now`.
    pub fn validate_at(&self, raw: &str, now: Timestamp) -> Result<ValidatedImage, CoreError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::Validation("imageUrl is required".into()));
        }

        let url = Url::parse(raw)
            .map_err(|e| CoreError::Validation(format!("imageUrl is not a valid URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::Validation(format!(
                "imageUrl must use http or https, got '{}'",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| CoreError::Validation("imageUrl has no host".into()))?;

        let trusted = self.is_trusted_host(host);
        let public_image = self.allow_public_images && IMAGE_EXTENSION_RE.is_match(url.path());
        if !trusted && !public_image {
            return Err(CoreError::Validation(format!(
                "imageUrl host '{host}' is not an accepted image source"
            )));
        }

        let token = parse_access_token(&url)?;
        if let Some(token) = &token {
            check_token(token, now)?;
        }

        Ok(ValidatedImage {
            url,
            token,
            trusted_storage: trusted,
        })
    }

    fn is_trusted_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.trusted_hosts.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            if entry.starts_with('.') {
                host.ends_with(&entry)
            } else {
                host == entry
            }
        })
    }
}

/// Extract shared-access token parameters, if the URL carries a signature.
fn parse_access_token(url: &Url) -> Result<Option<AccessToken>, CoreError> {
    let mut signature = None;
    let mut permissions = String::new();
    let mut expiry = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "sig" => signature = Some(value.into_owned()),
            "sp" => permissions = value.into_owned(),
            "se" => expiry = Some(value.into_owned()),
            _ => {}
        }
    }

    if signature.is_none() {
        return Ok(None);
    }

    let expires_at = expiry
        .map(|se| {
            chrono::DateTime::parse_from_rfc3339(&se)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|_| CoreError::Validation(format!("imageUrl token has invalid expiry '{se}'")))
        })
        .transpose()?;

    Ok(Some(AccessToken {
        permissions,
        expires_at,
    }))
}

fn check_token(token: &AccessToken, now: Timestamp) -> Result<(), CoreError> {
    if !token.permissions.contains('r') {
        return Err(CoreError::Validation(
            "imageUrl token does not grant read permission".into(),
        ));
    }
    if let Some(expires_at) = token.expires_at {
        if expires_at <= now {
            return Err(CoreError::Validation("imageUrl token has expired".into()));
        }
    }
    Ok(())
}

/// `scheme://host[:port]/path` with query and fragment removed.
pub fn normalized_url(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.to_string()
}
