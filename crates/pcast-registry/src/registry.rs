//! The job registry contract.

use async_trait::async_trait;

use pcast_models::{
    ImageCounts, Job, JobId, JobKind, JobOutcome, JobStatus, NarrationTrack, StatusFilter, Story,
    StoryId, StoryStatus,
};

use crate::error::RegistryResult;

/// Durable record of stories and their independently completing jobs.
///
/// Each job mutation targets a single record. Story status writes are
/// forward-only: implementations must check the current status against
/// [`StoryStatus::can_transition_to`] in the same atomic step as the write.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Round-trip to the backing store, used by readiness probes.
    async fn ping(&self) -> RegistryResult<()> {
        Ok(())
    }

    /// Insert a new story.
    async fn create_story(&self, story: &Story) -> RegistryResult<()>;

    /// Load a story.
    async fn get_story(&self, story_id: &StoryId) -> RegistryResult<Option<Story>>;

    /// Move a story forward to `status`.
    ///
    /// Returns `false` (and writes nothing) when the transition would not be
    /// forward from the current status.
    async fn update_story_status(&self, story_id: &StoryId, status: StoryStatus) -> RegistryResult<bool>;

    /// Compare-and-set: move from exactly `from` to `to`.
    ///
    /// Of any number of concurrent callers with the same `from`, at most one
    /// observes `true`.
    async fn advance_story_status(
        &self,
        story_id: &StoryId,
        from: StoryStatus,
        to: StoryStatus,
    ) -> RegistryResult<bool>;

    /// Record the story's collective narration track.
    async fn set_narration(&self, story_id: &StoryId, narration: NarrationTrack) -> RegistryResult<()>;

    /// Insert a job record.
    async fn create_job(&self, job: &Job) -> RegistryResult<()>;

    /// Load a job.
    async fn get_job(&self, job_id: &JobId) -> RegistryResult<Option<Job>>;

    /// Find the job a vendor correlation ID belongs to.
    async fn find_by_response_id(&self, response_id: &str) -> RegistryResult<Option<Job>>;

    /// All jobs of one kind for a story.
    async fn list_jobs(&self, story_id: &StoryId, kind: JobKind) -> RegistryResult<Vec<Job>>;

    /// Live count of a story's jobs of `kind` matching `filter`.
    async fn count_by_status(
        &self,
        story_id: &StoryId,
        kind: JobKind,
        filter: &StatusFilter,
    ) -> RegistryResult<u64>;

    /// Record that a vendor accepted the request. No-op once resolved.
    async fn mark_job_processing(&self, job_id: &JobId, response_id: Option<String>) -> RegistryResult<bool>;

    /// Apply a terminal outcome. Only the first terminal mutation is kept;
    /// later calls return `false`.
    async fn mark_job_terminal(&self, job_id: &JobId, outcome: &JobOutcome) -> RegistryResult<bool>;

    /// Image totals for the completion evaluator, each re-queried live.
    async fn image_counts(&self, story_id: &StoryId) -> RegistryResult<ImageCounts> {
        let total = self
            .count_by_status(story_id, JobKind::Image, &StatusFilter::Any)
            .await?;
        let completed = self
            .count_by_status(story_id, JobKind::Image, &StatusFilter::one(JobStatus::Completed))
            .await?;
        let failed = self
            .count_by_status(story_id, JobKind::Image, &StatusFilter::one(JobStatus::Failed))
            .await?;
        let in_flight = self
            .count_by_status(story_id, JobKind::Image, &StatusFilter::in_flight())
            .await?;

        Ok(ImageCounts {
            total,
            completed,
            failed,
            in_flight,
        })
    }
}
