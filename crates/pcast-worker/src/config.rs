//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::evaluator::MIN_IMAGE_SUCCESS_RATE;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fraction of dispatched images that must complete before a story is ready
    pub min_image_success_rate: f64,
    /// Maximum generation requests in flight per story
    pub max_scene_parallel: usize,
    /// Optional cap on outbound generation requests per second
    pub dispatch_rate_per_second: Option<u32>,
    /// Retries for a transient dispatch failure (not counting the first attempt)
    pub dispatch_max_retries: u32,
    /// Base delay for dispatch retry backoff
    pub dispatch_retry_base_delay: Duration,
    /// Status checks before an unresolved job is failed as timed out
    pub poll_max_attempts: u32,
    /// Delay between status checks
    pub poll_interval: Duration,
    /// Re-host vendor media in the blob store before recording it
    pub rehost_media: bool,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_image_success_rate: MIN_IMAGE_SUCCESS_RATE,
            max_scene_parallel: 10,
            dispatch_rate_per_second: None,
            dispatch_max_retries: 3,
            dispatch_retry_base_delay: Duration::from_millis(500),
            poll_max_attempts: 90,
            poll_interval: Duration::from_secs(10), // 15 minutes in total
            rehost_media: true,
            shutdown_timeout: Duration::from_secs(30),
            work_dir: "/tmp/pcast".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            min_image_success_rate: std::env::var("MIN_IMAGE_SUCCESS_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_image_success_rate),
            max_scene_parallel: std::env::var("WORKER_MAX_SCENE_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_scene_parallel),
            dispatch_rate_per_second: std::env::var("WORKER_DISPATCH_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|rps| *rps > 0),
            dispatch_max_retries: std::env::var("WORKER_DISPATCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.dispatch_max_retries),
            dispatch_retry_base_delay: Duration::from_millis(
                std::env::var("WORKER_DISPATCH_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            poll_max_attempts: std::env::var("WORKER_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll_max_attempts),
            poll_interval: Duration::from_secs(
                std::env::var("WORKER_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            rehost_media: std::env::var("WORKER_REHOST_MEDIA")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.rehost_media),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        let rate = self.min_image_success_rate;
        if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
            return Err(WorkerError::config_error(format!(
                "min_image_success_rate must be in (0, 1], got {}",
                rate
            )));
        }
        if self.max_scene_parallel == 0 {
            return Err(WorkerError::config_error("max_scene_parallel must be at least 1"));
        }
        if self.poll_max_attempts == 0 {
            return Err(WorkerError::config_error("poll_max_attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_image_success_rate, 0.90);
    }

    #[test]
    fn test_rate_bounds() {
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            let config = WorkerConfig {
                min_image_success_rate: bad,
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(WorkerError::ConfigError(_))),
                "rate {} should be rejected",
                bad
            );
        }

        let config = WorkerConfig {
            min_image_success_rate: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = WorkerConfig {
            max_scene_parallel: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
