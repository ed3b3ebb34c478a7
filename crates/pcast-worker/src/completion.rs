//! Completion handling.
//!
//! Every route by which a job can finish (vendor webhook, synchronous
//! vendor response, dispatch failure, poll timeout) ends here: the outcome
//! is recorded once, announced, and the story is re-evaluated.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use pcast_events::EventSink;
use pcast_models::{GenerationOutcome, Job, JobId, JobKind, JobOutcome, JobStatus, StoryEvent};
use pcast_registry::{JobRegistry, RegistryError};

use crate::error::WorkerResult;
use crate::evaluator::{CompletionCheck, CompletionEvaluator};
use crate::media::MediaRehoster;
use crate::metrics;
use crate::narration::NarrationAssembler;

/// What handling an outcome did.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No job carries the reported response id
    UnknownResponse,
    /// The job was already terminal; nothing written
    Duplicate,
    /// The outcome was recorded and the story re-evaluated
    Applied {
        job_id: JobId,
        status: JobStatus,
        check: CompletionCheck,
    },
}

/// Records job outcomes and drives the story forward.
pub struct CompletionHandler {
    registry: Arc<dyn JobRegistry>,
    events: Arc<dyn EventSink>,
    evaluator: Arc<CompletionEvaluator>,
    narration: Arc<NarrationAssembler>,
    rehoster: Option<MediaRehoster>,
}

impl CompletionHandler {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        events: Arc<dyn EventSink>,
        evaluator: Arc<CompletionEvaluator>,
        narration: Arc<NarrationAssembler>,
    ) -> Self {
        Self {
            registry,
            events,
            evaluator,
            narration,
            rehoster: None,
        }
    }

    /// Copy completed media into the blob store before recording it.
    pub fn with_rehoster(mut self, rehoster: MediaRehoster) -> Self {
        self.rehoster = Some(rehoster);
        self
    }

    pub fn evaluator(&self) -> &Arc<CompletionEvaluator> {
        &self.evaluator
    }

    /// Apply a vendor report.
    ///
    /// The echoed job id is tried first, since a vendor may call back before
    /// its response id has been recorded. Unknown ids are logged and ignored;
    /// the job may have been cleaned up.
    pub async fn handle_outcome(&self, report: GenerationOutcome) -> WorkerResult<Resolution> {
        let Some(job) = self.find_reported_job(&report).await? else {
            metrics::record_unmatched_webhook();
            warn!(
                response_id = %report.response_id,
                job_id = ?report.job_id,
                "No job for report, ignoring"
            );
            return Ok(Resolution::UnknownResponse);
        };

        self.resolve_job(&job.job_id, report.into_outcome()).await
    }

    async fn find_reported_job(&self, report: &GenerationOutcome) -> WorkerResult<Option<Job>> {
        if let Some(job_id) = &report.job_id {
            if let Some(job) = self.registry.get_job(job_id).await? {
                // A recorded response id must agree, or the report belongs to another request.
                return Ok(match &job.response_id {
                    Some(recorded) if recorded != &report.response_id => None,
                    _ => Some(job),
                });
            }
        }
        Ok(self.registry.find_by_response_id(&report.response_id).await?)
    }

    /// Record a terminal outcome for a job and re-evaluate its story.
    pub async fn resolve_job(&self, job_id: &JobId, outcome: JobOutcome) -> WorkerResult<Resolution> {
        let job = self
            .registry
            .get_job(job_id)
            .await?
            .ok_or_else(|| RegistryError::not_found(format!("job {}", job_id)))?;

        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Job already resolved");
            return Ok(Resolution::Duplicate);
        }

        let outcome = self.store_media(&job, outcome).await;
        if !self.registry.mark_job_terminal(job_id, &outcome).await? {
            debug!(job_id = %job_id, "Lost race to resolve job");
            return Ok(Resolution::Duplicate);
        }

        let status = outcome.status();
        match &outcome {
            JobOutcome::Completed { .. } => info!(
                job_id = %job_id,
                story_id = %job.story_id,
                kind = %job.kind(),
                "Job completed"
            ),
            JobOutcome::Failed { reason } => warn!(
                job_id = %job_id,
                story_id = %job.story_id,
                kind = %job.kind(),
                "Job failed: {}", reason
            ),
        }

        let event = StoryEvent::job_resolved(job.story_id.clone(), job_id.clone(), job.kind(), status);
        if let Err(e) = self.events.publish(&event).await {
            warn!(job_id = %job_id, "Failed to publish job resolution: {}", e);
        }

        if job.kind() == JobKind::AudioSegment {
            if let Err(e) = self.narration.assemble_if_ready(&job.story_id).await {
                error!(story_id = %job.story_id, "Narration assembly failed: {}", e);
            }
        }

        let check = self.evaluator.check_story_completion(&job.story_id).await;

        Ok(Resolution::Applied {
            job_id: job_id.clone(),
            status,
            check,
        })
    }

    async fn store_media(&self, job: &Job, outcome: JobOutcome) -> JobOutcome {
        let Some(rehoster) = &self.rehoster else {
            return outcome;
        };
        let (media_url, duration_secs) = match &outcome {
            JobOutcome::Completed {
                media_url,
                duration_secs,
            } => (media_url.clone(), *duration_secs),
            JobOutcome::Failed { .. } => return outcome,
        };

        let user_id = match self.registry.get_story(&job.story_id).await {
            Ok(Some(story)) => story.user_id,
            Ok(None) => return JobOutcome::failed("story missing while storing media"),
            Err(e) => return JobOutcome::failed(format!("media upload failed: {}", e)),
        };

        match rehoster.rehost(&user_id, job, &media_url).await {
            Ok(stored) => JobOutcome::Completed {
                media_url: stored,
                duration_secs,
            },
            Err(e) => {
                warn!(job_id = %job.job_id, "Could not store vendor media: {}", e);
                JobOutcome::failed(format!("media upload failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::{AudioInput, EncodedAudio, MediaEncoder};
    use crate::trigger::PhaseTrigger;
    use async_trait::async_trait;
    use pcast_events::MemoryEventSink;
    use pcast_models::{OutcomeStatus, Story, StoryId, StoryStatus};
    use pcast_registry::MemoryRegistry;
    use pcast_storage::MemoryBlobStore;

    struct NoopTrigger;

    #[async_trait]
    impl PhaseTrigger for NoopTrigger {
        async fn on_story_ready(&self, _story_id: &StoryId) -> WorkerResult<()> {
            Ok(())
        }
    }

    struct SilentEncoder;

    #[async_trait]
    impl MediaEncoder for SilentEncoder {
        async fn concat_audio(&self, segments: &[AudioInput]) -> WorkerResult<EncodedAudio> {
            Ok(EncodedAudio {
                bytes: vec![0; 4],
                duration_secs: segments.len() as f64,
            })
        }
    }

    async fn setup() -> (Arc<MemoryRegistry>, Arc<MemoryEventSink>, CompletionHandler, Story) {
        let registry = Arc::new(MemoryRegistry::new());
        let events = Arc::new(MemoryEventSink::new());
        let story = Story::new(StoryId::new(), "user-1", "prompt", 60);
        registry.create_story(&story).await.unwrap();
        registry
            .update_story_status(&story.story_id, StoryStatus::ScriptCompleted)
            .await
            .unwrap();

        let evaluator = Arc::new(CompletionEvaluator::new(
            registry.clone(),
            events.clone(),
            Arc::new(NoopTrigger),
        ));
        let narration = Arc::new(NarrationAssembler::new(
            registry.clone(),
            Arc::new(MemoryBlobStore::default()),
            Arc::new(SilentEncoder),
            events.clone(),
        ));
        let handler = CompletionHandler::new(registry.clone(), events.clone(), evaluator, narration);
        (registry, events, handler, story)
    }

    fn report(response_id: &str, status: OutcomeStatus, media_url: Option<&str>) -> GenerationOutcome {
        GenerationOutcome {
            response_id: response_id.to_string(),
            job_id: None,
            status,
            media_url: media_url.map(str::to_string),
            duration_secs: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_response_is_ignored() {
        let (registry, events, handler, story) = setup().await;
        let job = Job::image(story.story_id.clone(), 1, 0, 4.0);
        registry.create_job(&job).await.unwrap();

        let resolution = handler
            .handle_outcome(report("nobody", OutcomeStatus::Completed, Some("https://v/x.png")))
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::UnknownResponse);
        let stored = registry.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(events.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_report_is_duplicate() {
        let (registry, events, handler, story) = setup().await;
        let job = Job::image(story.story_id.clone(), 1, 0, 4.0);
        registry.create_job(&job).await.unwrap();
        registry
            .mark_job_processing(&job.job_id, Some("resp-1".to_string()))
            .await
            .unwrap();

        let first = handler
            .handle_outcome(report("resp-1", OutcomeStatus::Completed, Some("https://v/1.png")))
            .await
            .unwrap();
        assert!(matches!(
            first,
            Resolution::Applied {
                status: JobStatus::Completed,
                ..
            }
        ));

        let second = handler
            .handle_outcome(report("resp-1", OutcomeStatus::Failed, None))
            .await
            .unwrap();
        assert_eq!(second, Resolution::Duplicate);

        let stored = registry.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.media_url.as_deref(), Some("https://v/1.png"));
        assert_eq!(events.events_for(&story.story_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_completion_without_media_fails_job() {
        let (registry, _events, handler, story) = setup().await;
        let job = Job::music(story.story_id.clone());
        registry.create_job(&job).await.unwrap();
        registry
            .mark_job_processing(&job.job_id, Some("resp-m".to_string()))
            .await
            .unwrap();

        let resolution = handler
            .handle_outcome(report("resp-m", OutcomeStatus::Completed, None))
            .await
            .unwrap();

        match resolution {
            Resolution::Applied { status, check, .. } => {
                assert_eq!(status, JobStatus::Failed);
                assert!(matches!(check, CompletionCheck::NotReady(_)));
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_audio_segment_assembles_narration() {
        let (registry, _events, handler, story) = setup().await;
        let first = Job::audio_segment(story.story_id.clone(), 1, 1);
        let second = Job::audio_segment(story.story_id.clone(), 2, 2);
        registry.create_job(&first).await.unwrap();
        registry.create_job(&second).await.unwrap();

        handler
            .resolve_job(&first.job_id, JobOutcome::completed("https://v/1.mp3"))
            .await
            .unwrap();
        let story_now = registry.get_story(&story.story_id).await.unwrap().unwrap();
        assert!(!story_now.narration.is_ready());

        handler
            .resolve_job(&second.job_id, JobOutcome::completed("https://v/2.mp3"))
            .await
            .unwrap();
        let story_now = registry.get_story(&story.story_id).await.unwrap().unwrap();
        assert!(story_now.narration.is_ready());
    }

    #[tokio::test]
    async fn test_report_matched_by_job_id_before_response_is_recorded() {
        let (registry, _events, handler, story) = setup().await;
        let job = Job::image(story.story_id.clone(), 1, 0, 4.0);
        registry.create_job(&job).await.unwrap();

        let mut early = report("resp-early", OutcomeStatus::Completed, Some("https://v/e.png"));
        early.job_id = Some(job.job_id.clone());
        let resolution = handler.handle_outcome(early).await.unwrap();
        assert!(matches!(
            resolution,
            Resolution::Applied {
                status: JobStatus::Completed,
                ..
            }
        ));

        // The late processing mark must not reopen the job.
        assert!(!registry
            .mark_job_processing(&job.job_id, Some("resp-early".to_string()))
            .await
            .unwrap());
        let stored = registry.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_report_with_mismatched_response_id_is_ignored() {
        let (registry, _events, handler, story) = setup().await;
        let job = Job::image(story.story_id.clone(), 1, 0, 4.0);
        registry.create_job(&job).await.unwrap();
        registry
            .mark_job_processing(&job.job_id, Some("resp-current".to_string()))
            .await
            .unwrap();

        let mut stale = report("resp-stale", OutcomeStatus::Failed, None);
        stale.job_id = Some(job.job_id.clone());
        assert_eq!(handler.handle_outcome(stale).await.unwrap(), Resolution::UnknownResponse);

        let stored = registry.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }
}
