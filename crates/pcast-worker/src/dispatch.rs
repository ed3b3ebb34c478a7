//! Fan-out of a story plan to generation vendors.
//!
//! Every job is recorded before anything is dispatched, so the evaluator
//! never sees a partial set. Narration, music and anchors go out first;
//! shots follow once the anchors they depend on have resolved. A job whose
//! dispatch fails is resolved as `failed` and the rest carry on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pcast_events::EventSink;
use pcast_models::{
    Job, JobDetails, JobId, JobKind, JobOutcome, JobStatus, Story, StoryEvent, StoryId, StoryStatus,
};
use pcast_registry::JobRegistry;

use crate::anchors::{plan_anchors, AnchorPlan};
use crate::completion::CompletionHandler;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::limiter::{ConcurrencyLimiter, UnitOutcome};
use crate::logging::StoryLogger;
use crate::metrics;
use crate::plan::{EntityRef, StoryPlan};
use crate::poller::{JobStatusSource, Poller};
use crate::retry::{retry_async, retry_async_if, RetryConfig, RetryResult};

/// What to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationTask {
    Narration {
        text: String,
    },
    Image {
        prompt: String,
        #[serde(rename = "durationSecs")]
        duration_secs: f64,
        /// Anchor images to keep recurring entities consistent
        #[serde(rename = "referenceUrls")]
        reference_urls: Vec<String>,
    },
    Anchor {
        entity: EntityRef,
    },
    Music {
        prompt: String,
        #[serde(rename = "durationSecs")]
        duration_secs: u32,
    },
}

/// One outbound generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub story_id: StoryId,
    #[serde(flatten)]
    pub task: GenerationTask,
}

impl GenerationRequest {
    pub fn kind(&self) -> JobKind {
        match self.task {
            GenerationTask::Narration { .. } => JobKind::AudioSegment,
            GenerationTask::Image { .. } => JobKind::Image,
            GenerationTask::Anchor { .. } => JobKind::Anchor,
            GenerationTask::Music { .. } => JobKind::Music,
        }
    }
}

/// How a vendor answered a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Work started; the result arrives later under `response_id`
    Accepted { response_id: String },
    /// The vendor answered synchronously
    Finished(JobOutcome),
}

/// Outbound generation collaborator.
#[async_trait]
pub trait GenerationDispatcher: Send + Sync {
    async fn request(&self, request: &GenerationRequest) -> WorkerResult<Dispatched>;
}

/// How one job's dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReport {
    Accepted,
    Finished,
    Failed,
}

/// Totals for one dispatched plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub jobs_created: usize,
    pub anchors_required: usize,
    pub accepted: usize,
    pub finished: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn tally(&mut self, outcomes: &[UnitOutcome<DispatchReport>]) {
        for outcome in outcomes {
            match outcome {
                Ok(DispatchReport::Accepted) => self.accepted += 1,
                Ok(DispatchReport::Finished) => self.finished += 1,
                Ok(DispatchReport::Failed) | Err(_) => self.failed += 1,
            }
        }
    }
}

/// Dispatches a story's generation jobs.
pub struct StoryDispatcher {
    registry: Arc<dyn JobRegistry>,
    events: Arc<dyn EventSink>,
    generator: Arc<dyn GenerationDispatcher>,
    handler: Arc<CompletionHandler>,
    status_source: Arc<dyn JobStatusSource>,
    limiter: ConcurrencyLimiter,
    poller: Poller,
    retry: RetryConfig,
    settle_retry: RetryConfig,
}

impl StoryDispatcher {
    pub fn new(
        config: &WorkerConfig,
        registry: Arc<dyn JobRegistry>,
        events: Arc<dyn EventSink>,
        generator: Arc<dyn GenerationDispatcher>,
        handler: Arc<CompletionHandler>,
        status_source: Arc<dyn JobStatusSource>,
    ) -> WorkerResult<Self> {
        let limiter = match config.dispatch_rate_per_second {
            Some(rps) => ConcurrencyLimiter::with_rate_limit(config.max_scene_parallel, rps)?,
            None => ConcurrencyLimiter::new(config.max_scene_parallel)?,
        };

        Ok(Self {
            registry,
            events,
            generator,
            handler,
            status_source,
            limiter,
            poller: Poller::from_config(config),
            retry: RetryConfig::new("generation_request")
                .with_max_retries(config.dispatch_max_retries)
                .with_base_delay(config.dispatch_retry_base_delay),
            settle_retry: RetryConfig::new("settle_failed_dispatch")
                .with_max_retries(config.dispatch_max_retries)
                .with_base_delay(config.dispatch_retry_base_delay),
        })
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Record a new story and dispatch its plan.
    pub async fn start_story(self: &Arc<Self>, story: Story, plan: StoryPlan) -> WorkerResult<DispatchSummary> {
        plan.validate()?;
        self.registry.create_story(&story).await?;
        self.dispatch_plan(&story.story_id, &plan).await
    }

    /// Create and dispatch every job in `plan` for an existing story.
    pub async fn dispatch_plan(self: &Arc<Self>, story_id: &StoryId, plan: &StoryPlan) -> WorkerResult<DispatchSummary> {
        plan.validate()?;

        let story = self
            .registry
            .get_story(story_id)
            .await?
            .ok_or_else(|| WorkerError::StoryNotFound(story_id.to_string()))?;
        if story.status.has_reached(StoryStatus::ScriptCompleted) || story.status.is_failed() {
            return Err(WorkerError::invalid_plan(format!(
                "story {} is already {}",
                story_id, story.status
            )));
        }

        let logger = StoryLogger::new(story_id, "dispatch");
        logger.log_start(&format!(
            "{} scenes, {} shots",
            plan.scenes.len(),
            if story.video_enabled { plan.shot_count() } else { 0 }
        ));

        let mut summary = DispatchSummary::default();
        let mut first_wave: Vec<(Job, GenerationTask)> = Vec::new();

        for scene in &plan.scenes {
            let job = Job::audio_segment(story_id.clone(), scene.scene_id, scene.scene_number);
            self.registry.create_job(&job).await?;
            first_wave.push((
                job,
                GenerationTask::Narration {
                    text: scene.narration.clone(),
                },
            ));
        }

        let music = Job::music(story_id.clone());
        self.registry.create_job(&music).await?;
        first_wave.push((
            music,
            GenerationTask::Music {
                prompt: plan.music_prompt.clone().unwrap_or_else(|| story.prompt.clone()),
                duration_secs: story.target_duration_secs,
            },
        ));

        let mut anchors = AnchorPlan::default();
        let mut images = Vec::new();
        if story.video_enabled {
            anchors = plan_anchors(story_id, plan);
            for job in &anchors.jobs {
                self.registry.create_job(job).await?;
            }
            for job in anchors.pending_jobs() {
                if let Some(entity) = entity_for(job, plan) {
                    first_wave.push((job.clone(), GenerationTask::Anchor { entity }));
                }
            }

            for scene in &plan.scenes {
                for (index, shot) in scene.shots.iter().enumerate() {
                    let job = Job::image(story_id.clone(), scene.scene_id, index as u32, shot.duration_secs);
                    self.registry.create_job(&job).await?;
                    images.push((job, shot));
                }
            }
        }

        summary.anchors_required = anchors.required.len();
        summary.jobs_created = plan.scenes.len() + 1 + anchors.jobs.len() + images.len();

        if self
            .registry
            .update_story_status(story_id, StoryStatus::ScriptCompleted)
            .await?
        {
            self.publish(StoryEvent::status_changed(
                story_id.clone(),
                story.status,
                StoryStatus::ScriptCompleted,
            ))
            .await;
        }

        let outcomes = self.run_wave(first_wave).await;
        summary.tally(&outcomes);

        let references = self.await_anchors(story_id, &anchors).await;

        let image_wave: Vec<(Job, GenerationTask)> = images
            .into_iter()
            .map(|(job, shot)| {
                let reference_urls = shot
                    .entity_ids
                    .iter()
                    .filter_map(|id| references.get(id).cloned())
                    .collect();
                let task = GenerationTask::Image {
                    prompt: shot.prompt.clone(),
                    duration_secs: shot.duration_secs,
                    reference_urls,
                };
                (job, task)
            })
            .collect();
        let outcomes = self.run_wave(image_wave).await;
        summary.tally(&outcomes);

        if summary.failed > 0 {
            logger.log_warning(&format!("{} jobs failed at dispatch", summary.failed));
        }
        logger.log_completion(&format!(
            "{} jobs: {} accepted, {} finished, {} failed",
            summary.jobs_created, summary.accepted, summary.finished, summary.failed
        ));
        Ok(summary)
    }

    async fn run_wave(self: &Arc<Self>, units: Vec<(Job, GenerationTask)>) -> Vec<UnitOutcome<DispatchReport>> {
        if units.is_empty() {
            return Vec::new();
        }

        let jobs: Vec<Job> = units.iter().map(|(job, _)| job.clone()).collect();
        let futures = units.into_iter().map(|(job, task)| {
            let this = Arc::clone(self);
            async move { this.dispatch_job(job, task).await }
        });

        let outcomes = self.limiter.run_all(futures).await;
        for (job, outcome) in jobs.into_iter().zip(&outcomes) {
            if let Err(e) = outcome {
                warn!(job_id = %job.job_id, story_id = %job.story_id, "Dispatch unit errored: {}", e);
                self.settle_failed(job, e).await;
            }
        }
        outcomes
    }

    /// Resolve a job whose dispatch ended in an error.
    ///
    /// The unit may have stopped anywhere, even after the vendor accepted, so
    /// the job is failed here. If the registry refuses that too, a watchdog
    /// keeps trying after the poll budget.
    async fn settle_failed(self: &Arc<Self>, job: Job, error: &WorkerError) {
        let outcome = JobOutcome::failed(format!("dispatch error: {}", error));
        let settled = retry_async(&self.settle_retry, || {
            self.handler.resolve_job(&job.job_id, outcome.clone())
        })
        .await;

        if let RetryResult::Failed { error, attempts } = settled {
            warn!(
                job_id = %job.job_id,
                attempts = attempts,
                "Could not fail errored job, leaving it to a watchdog: {}", error
            );
            self.spawn_watchdog(job);
        }
    }

    async fn dispatch_job(self: Arc<Self>, job: Job, task: GenerationTask) -> WorkerResult<DispatchReport> {
        let request = GenerationRequest {
            job_id: job.job_id.clone(),
            story_id: job.story_id.clone(),
            task,
        };
        let kind = job.kind();

        let result = retry_async_if(
            &self.retry,
            || self.generator.request(&request),
            WorkerError::is_retryable,
        )
        .await;

        match result {
            RetryResult::Success(Dispatched::Accepted { response_id }) => {
                metrics::record_job_dispatched(kind.as_str());
                debug!(job_id = %job.job_id, kind = %kind, response_id = %response_id, "Request accepted");
                let recorded = self
                    .registry
                    .mark_job_processing(&job.job_id, Some(response_id.clone()))
                    .await?;
                if !recorded {
                    debug!(job_id = %job.job_id, "Job resolved before its acceptance was recorded");
                } else if kind != JobKind::Anchor {
                    let mut job = job;
                    job.response_id = Some(response_id);
                    job.status = JobStatus::Processing;
                    self.spawn_watchdog(job);
                }
                Ok(DispatchReport::Accepted)
            }
            RetryResult::Success(Dispatched::Finished(outcome)) => {
                metrics::record_job_dispatched(kind.as_str());
                self.handler.resolve_job(&job.job_id, outcome).await?;
                Ok(DispatchReport::Finished)
            }
            RetryResult::Failed { error, attempts } => {
                metrics::record_dispatch_failure(kind.as_str());
                warn!(
                    job_id = %job.job_id,
                    story_id = %job.story_id,
                    kind = %kind,
                    attempts = attempts,
                    "Dispatch failed: {}", error
                );
                self.handler
                    .resolve_job(&job.job_id, JobOutcome::failed(error.to_string()))
                    .await?;
                Ok(DispatchReport::Failed)
            }
        }
    }

    /// Poll an accepted job in the background so it cannot stay in flight forever.
    fn spawn_watchdog(self: &Arc<Self>, job: Job) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.poller.wait_for_outcome(this.status_source.as_ref(), &job).await;
            if let Err(e) = this.handler.resolve_job(&job.job_id, outcome).await {
                warn!(job_id = %job.job_id, "Watchdog could not resolve job: {}", e);
            }
        });
    }

    /// Wait for required anchors, then map entity id to reference image URL.
    ///
    /// Failed anchors are left out; their shots proceed without a reference.
    async fn await_anchors(&self, story_id: &StoryId, anchors: &AnchorPlan) -> HashMap<String, String> {
        if anchors.required.is_empty() {
            return HashMap::new();
        }

        let waits = anchors.pending_jobs().map(|planned| async move {
            let current = match self.registry.get_job(&planned.job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    warn!(job_id = %planned.job_id, "Could not load anchor: {}", e);
                    return;
                }
            };
            if current.status.is_resolved() {
                return;
            }
            let outcome = self
                .poller
                .wait_for_outcome(self.status_source.as_ref(), &current)
                .await;
            if let Err(e) = self.handler.resolve_job(&current.job_id, outcome).await {
                warn!(job_id = %current.job_id, "Could not resolve anchor: {}", e);
            }
        });
        join_all(waits).await;

        let jobs = match self.registry.list_jobs(story_id, JobKind::Anchor).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(story_id = %story_id, "Could not read anchors, shots go without references: {}", e);
                return HashMap::new();
            }
        };

        let references: HashMap<String, String> = jobs
            .into_iter()
            .filter(|job| job.status == JobStatus::Completed)
            .filter_map(|job| match (job.details, job.media_url) {
                (JobDetails::Anchor { entity_id, .. }, Some(url)) => Some((entity_id, url)),
                _ => None,
            })
            .collect();

        info!(
            story_id = %story_id,
            required = anchors.required.len(),
            available = references.len(),
            "Anchors settled"
        );
        references
    }

    async fn publish(&self, event: StoryEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(story_id = %event.story_id, "Failed to publish {}: {}", event.type_name(), e);
        }
    }
}

fn entity_for(job: &Job, plan: &StoryPlan) -> Option<EntityRef> {
    let JobDetails::Anchor { entity_id, .. } = &job.details else {
        return None;
    };
    plan.entities.iter().find(|e| &e.entity_id == entity_id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcast_models::AnchorType;

    #[test]
    fn test_request_wire_format() {
        let request = GenerationRequest {
            job_id: JobId::from_string("job-1"),
            story_id: StoryId::from("story-1"),
            task: GenerationTask::Image {
                prompt: "a lighthouse in fog".to_string(),
                duration_secs: 4.5,
                reference_urls: vec!["https://cdn/keeper.png".to_string()],
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["storyId"], "story-1");
        assert_eq!(json["kind"], "image");
        assert_eq!(json["durationSecs"], 4.5);
        assert_eq!(json["referenceUrls"][0], "https://cdn/keeper.png");
        assert_eq!(request.kind(), JobKind::Image);
    }

    #[test]
    fn test_anchor_request_carries_entity() {
        let request = GenerationRequest {
            job_id: JobId::new(),
            story_id: StoryId::new(),
            task: GenerationTask::Anchor {
                entity: EntityRef {
                    entity_id: "keeper".to_string(),
                    anchor_type: AnchorType::Character,
                    name: "The keeper".to_string(),
                    description: "An old man in oilskins".to_string(),
                },
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "anchor");
        assert_eq!(json["entity"]["anchorType"], "character");
    }

    #[test]
    fn test_summary_tally() {
        let mut summary = DispatchSummary::default();
        summary.tally(&[
            Ok(DispatchReport::Accepted),
            Ok(DispatchReport::Finished),
            Ok(DispatchReport::Failed),
            Err(WorkerError::processing_failed("panicked")),
        ]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.finished, 1);
        assert_eq!(summary.failed, 2);
    }
}
