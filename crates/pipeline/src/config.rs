use std::time::Duration;

use crate::breaker::{
    BreakerConfig, DEFAULT_ERROR_THRESHOLD_PCT, DEFAULT_RESET_TIMEOUT_MS,
    DEFAULT_VOLUME_THRESHOLD,
};
use crate::retry::{Backoff, RetryPolicy};

/// Default per-call deadline of the acne detector breaker.
pub const DEFAULT_ACNE_TIMEOUT_MS: u64 = 15_000;

/// Default per-call deadline of the wrinkle detector breaker.
pub const DEFAULT_WRINKLE_TIMEOUT_MS: u64 = 30_000;

/// Default attempt budget of the acne detector.
pub const DEFAULT_ACNE_MAX_RETRIES: u32 = 3;

/// Attempt budget of the wrinkle detector. Not configurable.
pub const WRINKLE_MAX_ATTEMPTS: u32 = 3;

/// Default deadline for downloading the source image.
pub const DEFAULT_SOURCE_DEADLINE_MS: u64 = 10_000;

/// Default deadline for one fan-out branch, retries included.
pub const DEFAULT_BRANCH_DEADLINE_MS: u64 = 35_000;

/// Default deadline for the recommendation call.
pub const DEFAULT_RECOMMENDATION_DEADLINE_MS: u64 = 10_000;

/// Wall-clock bounds on each stage of one inference.
///
/// A branch that runs past `branch` resolves to its fallback, so a hung
/// dependency degrades its own branch instead of the whole request.
#[derive(Debug, Clone)]
pub struct Deadlines {
    pub source: Duration,
    pub branch: Duration,
    pub recommendations: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            source: Duration::from_millis(DEFAULT_SOURCE_DEADLINE_MS),
            branch: Duration::from_millis(DEFAULT_BRANCH_DEADLINE_MS),
            recommendations: Duration::from_millis(DEFAULT_RECOMMENDATION_DEADLINE_MS),
        }
    }
}

impl Deadlines {
    /// Longest time one inference can take: the stages run one after another.
    pub fn total(&self) -> Duration {
        self.source + self.branch + self.recommendations
    }
}

/// Timeouts that cannot work together.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pipeline stages need up to {budget_ms} ms but requests time out after {limit_ms} ms")]
    BudgetExceedsRequestTimeout { budget_ms: u64, limit_ms: u64 },

    #[error("{breaker} call timeout of {timeout_ms} ms exceeds the branch deadline of {deadline_ms} ms")]
    CallTimeoutExceedsBranch {
        breaker: &'static str,
        timeout_ms: u64,
        deadline_ms: u64,
    },
}

/// Orchestrator tuning: breaker, retry and deadline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub acne_breaker: BreakerConfig,
    pub wrinkle_breaker: BreakerConfig,
    pub acne_max_attempts: u32,
    pub backoff: Backoff,
    pub deadlines: Deadlines,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acne_breaker: BreakerConfig::default()
                .with_timeout(Duration::from_millis(DEFAULT_ACNE_TIMEOUT_MS)),
            wrinkle_breaker: BreakerConfig::default()
                .with_timeout(Duration::from_millis(DEFAULT_WRINKLE_TIMEOUT_MS)),
            acne_max_attempts: DEFAULT_ACNE_MAX_RETRIES,
            backoff: Backoff::default(),
            deadlines: Deadlines::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `ACNE_MAX_RETRIES`            | `3`     |
    /// | `ACNE_BREAKER_TIMEOUT_MS`     | `15000` |
    /// | `WRINKLE_BREAKER_TIMEOUT_MS`  | `30000` |
    /// | `BREAKER_ERROR_THRESHOLD_PCT` | `50`    |
    /// | `BREAKER_RESET_TIMEOUT_MS`    | `30000` |
    /// | `BREAKER_VOLUME_THRESHOLD`    | `5`     |
    /// | `SOURCE_DEADLINE_MS`          | `10000` |
    /// | `BRANCH_DEADLINE_MS`          | `35000` |
    /// | `RECOMMENDATION_DEADLINE_MS`  | `10000` |
    pub fn from_env() -> Self {
        let shared = BreakerConfig {
            error_threshold_percentage: env_parse("BREAKER_ERROR_THRESHOLD_PCT")
                .unwrap_or(DEFAULT_ERROR_THRESHOLD_PCT),
            reset_timeout: Duration::from_millis(
                env_parse("BREAKER_RESET_TIMEOUT_MS").unwrap_or(DEFAULT_RESET_TIMEOUT_MS),
            ),
            volume_threshold: env_parse("BREAKER_VOLUME_THRESHOLD")
                .unwrap_or(DEFAULT_VOLUME_THRESHOLD),
            ..BreakerConfig::default()
        };

        Self {
            acne_breaker: shared.clone().with_timeout(env_millis(
                "ACNE_BREAKER_TIMEOUT_MS",
                DEFAULT_ACNE_TIMEOUT_MS,
            )),
            wrinkle_breaker: shared.with_timeout(env_millis(
                "WRINKLE_BREAKER_TIMEOUT_MS",
                DEFAULT_WRINKLE_TIMEOUT_MS,
            )),
            acne_max_attempts: env_parse("ACNE_MAX_RETRIES").unwrap_or(DEFAULT_ACNE_MAX_RETRIES),
            backoff: Backoff::default(),
            deadlines: Deadlines {
                source: env_millis("SOURCE_DEADLINE_MS", DEFAULT_SOURCE_DEADLINE_MS),
                branch: env_millis("BRANCH_DEADLINE_MS", DEFAULT_BRANCH_DEADLINE_MS),
                recommendations: env_millis(
                    "RECOMMENDATION_DEADLINE_MS",
                    DEFAULT_RECOMMENDATION_DEADLINE_MS,
                ),
            },
        }
    }

    /// Check that every stage finishes before an outer `request_timeout`
    /// cuts the request off, and that a single call fits in its branch.
    pub fn check_request_timeout(&self, request_timeout: Duration) -> Result<(), ConfigError> {
        let budget = self.deadlines.total();
        if budget >= request_timeout {
            return Err(ConfigError::BudgetExceedsRequestTimeout {
                budget_ms: budget.as_millis() as u64,
                limit_ms: request_timeout.as_millis() as u64,
            });
        }

        let branch = self.deadlines.branch;
        for (breaker, config) in [
            (crate::registry::ACNE_BREAKER, &self.acne_breaker),
            (crate::registry::WRINKLE_BREAKER, &self.wrinkle_breaker),
        ] {
            if config.timeout > branch {
                return Err(ConfigError::CallTimeoutExceedsBranch {
                    breaker,
                    timeout_ms: config.timeout.as_millis() as u64,
                    deadline_ms: branch.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    pub fn acne_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.acne_max_attempts, self.backoff.clone())
    }

    pub fn wrinkle_retry(&self) -> RetryPolicy {
        RetryPolicy::new(WRINKLE_MAX_ATTEMPTS, self.backoff.clone())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(name).unwrap_or(default_ms))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_fit_the_default_request_timeout() {
        let config = PipelineConfig::default();

        assert_eq!(config.deadlines.total(), Duration::from_secs(55));
        assert!(config.check_request_timeout(Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn budget_at_or_over_the_request_timeout_is_rejected() {
        let config = PipelineConfig::default();

        assert_matches!(
            config.check_request_timeout(Duration::from_secs(55)),
            Err(ConfigError::BudgetExceedsRequestTimeout {
                budget_ms: 55_000,
                limit_ms: 55_000
            })
        );
    }

    #[test]
    fn call_timeout_longer_than_its_branch_is_rejected() {
        let config = PipelineConfig {
            deadlines: Deadlines {
                branch: Duration::from_secs(20),
                ..Deadlines::default()
            },
            ..PipelineConfig::default()
        };

        assert_matches!(
            config.check_request_timeout(Duration::from_secs(60)),
            Err(ConfigError::CallTimeoutExceedsBranch {
                breaker: "wrinkle-detector",
                timeout_ms: 30_000,
                deadline_ms: 20_000
            })
        );
    }
}
