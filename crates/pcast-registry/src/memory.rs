//! In-memory job registry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use pcast_models::{
    Job, JobId, JobKind, JobOutcome, NarrationTrack, StatusFilter, Story, StoryId, StoryStatus,
};

use crate::error::{RegistryError, RegistryResult};
use crate::registry::JobRegistry;

#[derive(Default)]
struct State {
    stories: HashMap<StoryId, Story>,
    jobs: HashMap<JobId, Job>,
    by_story: HashMap<StoryId, Vec<JobId>>,
    by_response: HashMap<String, JobId>,
}

/// Registry held in process memory.
///
/// Every operation takes the lock once, so each call is atomic with respect
/// to other callers. An optional latency turns every call into a real
/// suspension point, which lets tests interleave concurrent callers.
#[derive(Default)]
pub struct MemoryRegistry {
    state: RwLock<State>,
    latency: Option<Duration>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` before every operation.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            latency: Some(latency),
        }
    }

    async fn suspend(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl JobRegistry for MemoryRegistry {
    async fn create_story(&self, story: &Story) -> RegistryResult<()> {
        self.suspend().await;
        let mut state = self.state.write().await;
        if state.stories.contains_key(&story.story_id) {
            return Err(RegistryError::already_exists(story.story_id.to_string()));
        }
        state.stories.insert(story.story_id.clone(), story.clone());
        Ok(())
    }

    async fn get_story(&self, story_id: &StoryId) -> RegistryResult<Option<Story>> {
        self.suspend().await;
        Ok(self.state.read().await.stories.get(story_id).cloned())
    }

    async fn update_story_status(&self, story_id: &StoryId, status: StoryStatus) -> RegistryResult<bool> {
        self.suspend().await;
        let mut state = self.state.write().await;
        let story = state
            .stories
            .get_mut(story_id)
            .ok_or_else(|| RegistryError::not_found(format!("story {}", story_id)))?;

        match story.advance(status) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(story_id = %story_id, "Rejected status write: {}", e);
                Ok(false)
            }
        }
    }

    async fn advance_story_status(
        &self,
        story_id: &StoryId,
        from: StoryStatus,
        to: StoryStatus,
    ) -> RegistryResult<bool> {
        self.suspend().await;
        let mut state = self.state.write().await;
        let story = state
            .stories
            .get_mut(story_id)
            .ok_or_else(|| RegistryError::not_found(format!("story {}", story_id)))?;

        if story.status != from {
            return Ok(false);
        }
        Ok(story.advance(to).is_ok())
    }

    async fn set_narration(&self, story_id: &StoryId, narration: NarrationTrack) -> RegistryResult<()> {
        self.suspend().await;
        let mut state = self.state.write().await;
        let story = state
            .stories
            .get_mut(story_id)
            .ok_or_else(|| RegistryError::not_found(format!("story {}", story_id)))?;
        story.narration = narration;
        story.updated_at = Utc::now();
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> RegistryResult<()> {
        self.suspend().await;
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.job_id) {
            return Err(RegistryError::already_exists(job.job_id.to_string()));
        }
        state
            .by_story
            .entry(job.story_id.clone())
            .or_default()
            .push(job.job_id.clone());
        if let Some(response_id) = &job.response_id {
            state.by_response.insert(response_id.clone(), job.job_id.clone());
        }
        state.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> RegistryResult<Option<Job>> {
        self.suspend().await;
        Ok(self.state.read().await.jobs.get(job_id).cloned())
    }

    async fn find_by_response_id(&self, response_id: &str) -> RegistryResult<Option<Job>> {
        self.suspend().await;
        let state = self.state.read().await;
        Ok(state
            .by_response
            .get(response_id)
            .and_then(|job_id| state.jobs.get(job_id))
            .cloned())
    }

    async fn list_jobs(&self, story_id: &StoryId, kind: JobKind) -> RegistryResult<Vec<Job>> {
        self.suspend().await;
        let state = self.state.read().await;
        let jobs = state
            .by_story
            .get(story_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.jobs.get(id))
                    .filter(|job| job.kind() == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(jobs)
    }

    async fn count_by_status(
        &self,
        story_id: &StoryId,
        kind: JobKind,
        filter: &StatusFilter,
    ) -> RegistryResult<u64> {
        self.suspend().await;
        let state = self.state.read().await;
        let count = state
            .by_story
            .get(story_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.jobs.get(id))
                    .filter(|job| job.kind() == kind && filter.matches(job.status))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn mark_job_processing(&self, job_id: &JobId, response_id: Option<String>) -> RegistryResult<bool> {
        self.suspend().await;
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::not_found(format!("job {}", job_id)))?;

        if !job.mark_processing(response_id.clone()) {
            return Ok(false);
        }
        if let Some(response_id) = response_id {
            state.by_response.insert(response_id, job_id.clone());
        }
        Ok(true)
    }

    async fn mark_job_terminal(&self, job_id: &JobId, outcome: &JobOutcome) -> RegistryResult<bool> {
        self.suspend().await;
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::not_found(format!("job {}", job_id)))?;
        Ok(job.resolve(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcast_models::JobStatus;
    use std::sync::Arc;

    async fn registry_with_story() -> (MemoryRegistry, StoryId) {
        let registry = MemoryRegistry::new();
        let story = Story::new(StoryId::new(), "user-1", "a quiet lighthouse", 90);
        registry.create_story(&story).await.unwrap();
        (registry, story.story_id)
    }

    #[tokio::test]
    async fn test_status_writes_only_move_forward() {
        let (registry, story_id) = registry_with_story().await;

        assert!(registry.update_story_status(&story_id, StoryStatus::Processing).await.unwrap());
        assert!(registry
            .update_story_status(&story_id, StoryStatus::ScriptCompleted)
            .await
            .unwrap());
        assert!(!registry.update_story_status(&story_id, StoryStatus::Processing).await.unwrap());

        let story = registry.get_story(&story_id).await.unwrap().unwrap();
        assert_eq!(story.status, StoryStatus::ScriptCompleted);
    }

    #[tokio::test]
    async fn test_missing_story_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry
            .update_story_status(&StoryId::new(), StoryStatus::Processing)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_compare_and_set_has_single_winner() {
        let registry = Arc::new(MemoryRegistry::with_latency(Duration::from_millis(1)));
        let story = Story::new(StoryId::new(), "user-1", "prompt", 60);
        registry.create_story(&story).await.unwrap();
        registry
            .update_story_status(&story.story_id, StoryStatus::Processing)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let story_id = story.story_id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .advance_story_status(&story_id, StoryStatus::Processing, StoryStatus::ScriptCompleted)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_counts_and_terminal_marking() {
        let (registry, story_id) = registry_with_story().await;

        let mut ids = Vec::new();
        for shot in 0..3 {
            let job = Job::image(story_id.clone(), 1, shot, 3.0);
            ids.push(job.job_id.clone());
            registry.create_job(&job).await.unwrap();
        }
        registry.create_job(&Job::music(story_id.clone())).await.unwrap();

        assert!(registry
            .mark_job_processing(&ids[0], Some("resp-0".into()))
            .await
            .unwrap());
        assert!(registry
            .mark_job_terminal(&ids[0], &JobOutcome::completed("https://cdn/0.png"))
            .await
            .unwrap());
        assert!(registry
            .mark_job_terminal(&ids[1], &JobOutcome::failed("nsfw filter"))
            .await
            .unwrap());
        // Second terminal write is ignored.
        assert!(!registry
            .mark_job_terminal(&ids[1], &JobOutcome::completed("https://cdn/1.png"))
            .await
            .unwrap());

        let counts = registry.image_counts(&story_id).await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.in_flight, 1);

        let found = registry.find_by_response_id("resp-0").await.unwrap().unwrap();
        assert_eq!(found.job_id, ids[0]);
        assert_eq!(found.status, JobStatus::Completed);

        let music = registry.list_jobs(&story_id, JobKind::Music).await.unwrap();
        assert_eq!(music.len(), 1);
    }
}
