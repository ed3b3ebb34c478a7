//! Bounded status polling.
//!
//! A job that never reports back must still become terminal, otherwise the
//! story's image gate can never pass. The poller checks a status source a
//! fixed number of times and resolves the job to `failed` when it runs out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use pcast_models::{Job, JobOutcome, JobStatus};
use pcast_registry::{JobRegistry, RegistryError};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;

/// Failure reason recorded when polling gives up.
pub const TIMED_OUT_REASON: &str = "timed out";

/// Where the current state of a dispatched job can be read.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    /// Terminal outcome of the job, or `None` while it is still running.
    async fn check(&self, job: &Job) -> WorkerResult<Option<JobOutcome>>;
}

/// Reads outcomes that webhooks already wrote to the registry.
pub struct RegistryStatusSource {
    registry: Arc<dyn JobRegistry>,
}

impl RegistryStatusSource {
    pub fn new(registry: Arc<dyn JobRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JobStatusSource for RegistryStatusSource {
    async fn check(&self, job: &Job) -> WorkerResult<Option<JobOutcome>> {
        let current = self
            .registry
            .get_job(&job.job_id)
            .await?
            .ok_or_else(|| RegistryError::not_found(format!("job {}", job.job_id)))?;
        Ok(recorded_outcome(&current))
    }
}

/// Outcome already stored on a job record, if it is terminal.
pub fn recorded_outcome(job: &Job) -> Option<JobOutcome> {
    match job.status {
        JobStatus::Completed => Some(match &job.media_url {
            Some(url) => JobOutcome::Completed {
                media_url: url.clone(),
                duration_secs: job.duration_secs,
            },
            None => JobOutcome::failed("completed without media"),
        }),
        JobStatus::Failed => Some(JobOutcome::failed(
            job.error_message.clone().unwrap_or_else(|| "generation failed".to_string()),
        )),
        _ => None,
    }
}

/// Fixed-interval poller with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct Poller {
    max_attempts: u32,
    interval: Duration,
}

impl Poller {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.poll_max_attempts, config.poll_interval)
    }

    /// Wait one interval, check, and repeat until the job is terminal.
    ///
    /// Source errors count as an attempt. Exhaustion yields a failed
    /// outcome with [`TIMED_OUT_REASON`].
    pub async fn wait_for_outcome(&self, source: &dyn JobStatusSource, job: &Job) -> JobOutcome {
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;

            match source.check(job).await {
                Ok(Some(outcome)) => {
                    debug!(
                        job_id = %job.job_id,
                        attempt = attempt,
                        "Job resolved while polling"
                    );
                    return outcome;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    job_id = %job.job_id,
                    attempt = attempt,
                    "Status check failed: {}", e
                ),
            }
        }

        metrics::record_job_timed_out(job.kind().as_str());
        warn!(
            job_id = %job.job_id,
            story_id = %job.story_id,
            kind = %job.kind(),
            "Job did not resolve after {} checks",
            self.max_attempts
        );
        JobOutcome::failed(TIMED_OUT_REASON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use pcast_models::StoryId;
    use pcast_registry::MemoryRegistry;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports the outcome on the n-th check.
    struct ScriptedSource {
        resolve_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobStatusSource for ScriptedSource {
        async fn check(&self, _job: &Job) -> WorkerResult<Option<JobOutcome>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 1 {
                return Err(WorkerError::dispatch_failed("vendor 502"));
            }
            if call == self.resolve_on {
                return Ok(Some(JobOutcome::completed("https://cdn/img.png")));
            }
            Ok(None)
        }
    }

    fn poller(attempts: u32) -> Poller {
        Poller::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_resolves_when_source_reports() {
        let source = ScriptedSource {
            resolve_on: 3,
            calls: AtomicU32::new(0),
        };
        let job = Job::image(StoryId::new(), 1, 0, 4.0);

        let outcome = poller(5).wait_for_outcome(&source, &job).await;

        assert_eq!(outcome, JobOutcome::completed("https://cdn/img.png"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_timed_out_failure() {
        let source = ScriptedSource {
            resolve_on: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let job = Job::image(StoryId::new(), 1, 0, 4.0);

        let outcome = poller(4).wait_for_outcome(&source, &job).await;

        assert_eq!(outcome, JobOutcome::failed(TIMED_OUT_REASON));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_registry_source_reads_recorded_outcome() {
        let registry = Arc::new(MemoryRegistry::new());
        let job = Job::music(StoryId::new());
        registry.create_job(&job).await.unwrap();
        let source = RegistryStatusSource::new(registry.clone());

        assert_eq!(source.check(&job).await.unwrap(), None);

        registry
            .mark_job_terminal(&job.job_id, &JobOutcome::failed("quota"))
            .await
            .unwrap();
        assert_eq!(source.check(&job).await.unwrap(), Some(JobOutcome::failed("quota")));

        let unknown = Job::music(StoryId::new());
        assert!(source.check(&unknown).await.is_err());
    }
}
