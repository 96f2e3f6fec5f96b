use std::time::Duration;

use dermalens_core::image_source::{parse_host_list, ImageSourcePolicy, DEFAULT_TRUSTED_HOST};
use dermalens_core::types::AppEnv;
use dermalens_store::queue::DEFAULT_QUEUE_KEY;

/// A configuration that would start an unsafe or inconsistent server.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ADMIN_TOKEN must be set when APP_ENV is production")]
    MissingAdminToken,
}

/// Front-door request budget per client identity.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window (default: `30`).
    pub max_requests: u32,
    /// Fixed window length (default: 60 s).
    pub window: Duration,
    /// Skip limiting entirely. Always set when `APP_ENV=test`.
    pub bypass: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
            bypass: false,
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`).
    pub request_timeout_secs: u64,
    pub app_env: AppEnv,
    /// Shared store URL. Unset runs with a local-only cache, an in-memory
    /// limiter and no job queue.
    pub redis_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    /// Host suffixes treated as trusted object storage.
    pub trusted_hosts: Vec<String>,
    /// Redis list holding queued jobs.
    pub queue_key: String,
    /// Bearer token required by the admin endpoints. Unset leaves them open
    /// outside production; production refuses to start without one.
    pub admin_token: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `3000`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `60`                       |
    /// | `APP_ENV`                 | `development`              |
    /// | `REDIS_URL`               | unset                      |
    /// | `RATE_LIMIT_MAX_REQUESTS` | `30`                       |
    /// | `RATE_LIMIT_WINDOW_SECS`  | `60`                       |
    /// | `RATE_LIMIT_BYPASS`       | `false`                    |
    /// | `TRUSTED_STORAGE_HOSTS`   | `.blob.core.windows.net`   |
    /// | `JOB_QUEUE_KEY`           | `dermalens:jobs`           |
    /// | `ADMIN_TOKEN`             | unset                      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let app_env = AppEnv::parse(&std::env::var("APP_ENV").unwrap_or_default());

        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let max_requests: u32 = std::env::var("RATE_LIMIT_MAX_REQUESTS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("RATE_LIMIT_MAX_REQUESTS must be a valid u32");

        let window_secs: u64 = std::env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("RATE_LIMIT_WINDOW_SECS must be a valid u64");

        let bypass = app_env == AppEnv::Test
            || std::env::var("RATE_LIMIT_BYPASS")
                .is_ok_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"));

        let trusted_hosts = parse_host_list(
            &std::env::var("TRUSTED_STORAGE_HOSTS").unwrap_or_else(|_| DEFAULT_TRUSTED_HOST.into()),
        );

        let queue_key = std::env::var("JOB_QUEUE_KEY").unwrap_or_else(|_| DEFAULT_QUEUE_KEY.into());

        let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|s| !s.is_empty());

        let config = Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            app_env,
            redis_url,
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
                bypass,
            },
            trusted_hosts,
            queue_key,
            admin_token,
        };
        config.validate().expect("Invalid server configuration");
        config
    }

    /// Reject combinations that must not reach a running server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_env.is_production() && self.admin_token.is_none() {
            return Err(ConfigError::MissingAdminToken);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Image-reference policy for the configured environment.
    pub fn image_policy(&self) -> ImageSourcePolicy {
        ImageSourcePolicy::for_env(self.app_env, self.trusted_hosts.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config(app_env: AppEnv, admin_token: Option<&str>) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: Vec::new(),
            request_timeout_secs: 60,
            app_env,
            redis_url: None,
            rate_limit: RateLimitConfig::default(),
            trusted_hosts: vec![DEFAULT_TRUSTED_HOST.into()],
            queue_key: DEFAULT_QUEUE_KEY.into(),
            admin_token: admin_token.map(Into::into),
        }
    }

    #[test]
    fn production_requires_an_admin_token() {
        assert_matches!(
            config(AppEnv::Production, None).validate(),
            Err(ConfigError::MissingAdminToken)
        );
        assert!(config(AppEnv::Production, Some("s3cret")).validate().is_ok());
    }

    #[test]
    fn admin_token_is_optional_outside_production() {
        assert!(config(AppEnv::Development, None).validate().is_ok());
        assert!(config(AppEnv::Test, None).validate().is_ok());
    }
}
