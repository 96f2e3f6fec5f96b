use std::time::Duration;

use dermalens_core::image_source::{parse_host_list, ImageSourcePolicy, DEFAULT_TRUSTED_HOST};
use dermalens_core::types::AppEnv;
use dermalens_store::queue::DEFAULT_QUEUE_KEY;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub queue_key: String,
    /// How long a single dequeue blocks before the loop checks for shutdown.
    pub poll_timeout: Duration,
    pub app_env: AppEnv,
    pub trusted_hosts: Vec<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `REDIS_URL`             | required                 |
    /// | `JOB_QUEUE_KEY`         | `dermalens:jobs`         |
    /// | `WORKER_POLL_SECS`      | `5`                      |
    /// | `APP_ENV`               | `development`            |
    /// | `TRUSTED_STORAGE_HOSTS` | `.blob.core.windows.net` |
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for the worker");

        let queue_key =
            std::env::var("JOB_QUEUE_KEY").unwrap_or_else(|_| DEFAULT_QUEUE_KEY.to_string());

        let poll_secs: u64 = std::env::var("WORKER_POLL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("WORKER_POLL_SECS must be a valid u64");

        let app_env = AppEnv::parse(&std::env::var("APP_ENV").unwrap_or_default());

        let trusted_hosts = parse_host_list(
            &std::env::var("TRUSTED_STORAGE_HOSTS").unwrap_or_else(|_| DEFAULT_TRUSTED_HOST.into()),
        );

        Self {
            redis_url,
            queue_key,
            poll_timeout: Duration::from_secs(poll_secs),
            app_env,
            trusted_hosts,
        }
    }

    pub fn image_policy(&self) -> ImageSourcePolicy {
        ImageSourcePolicy::for_env(self.app_env, self.trusted_hosts.clone())
    }
}
