//! Story completion evaluator.
//!
//! Decides whether every required component of a story has reached a
//! terminal state, applies the partial-failure threshold for images, and
//! moves the story to the ready marker exactly once. It is invoked after
//! every job resolution and may be called any number of times for the same
//! story, concurrently.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use pcast_events::EventSink;
use pcast_models::{
    ImageCounts, JobKind, JobStatus, StatusFilter, Story, StoryEvent, StoryId, StoryProgress,
    StoryStatus,
};
use pcast_registry::JobRegistry;

use crate::error::{WorkerError, WorkerResult};
use crate::guard::InFlightGuard;
use crate::metrics;
use crate::trigger::{spawn_phase_trigger, PhaseTrigger};

/// Share of dispatched images that must complete for a story to proceed.
pub const MIN_IMAGE_SUCCESS_RATE: f64 = 0.90;

/// Why a story is not ready yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Blocker {
    /// Narration track missing or not completed
    AudioIncomplete,
    /// No image was dispatched
    NoImages,
    /// Some images are still pending, processing or generating
    ImagesInFlight { in_flight: u64, total: u64 },
    /// Every image resolved but too few completed
    ImageSuccessBelowThreshold { completed: u64, total: u64, required: f64 },
    /// Background music missing or not completed
    MusicIncomplete,
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blocker::AudioIncomplete => write!(f, "audio not complete"),
            Blocker::NoImages => write!(f, "no images dispatched"),
            Blocker::ImagesInFlight { in_flight, total } => {
                write!(f, "{} of {} images still in flight", in_flight, total)
            }
            Blocker::ImageSuccessBelowThreshold {
                completed,
                total,
                required,
            } => write!(
                f,
                "{}/{} images completed, below required {:.0}%",
                completed,
                total,
                required * 100.0
            ),
            Blocker::MusicIncomplete => write!(f, "music not complete"),
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionCheck {
    /// Another evaluation of the same story is running in this process
    AlreadyEvaluating,
    /// No such story
    StoryMissing,
    /// Story is already at or past the ready marker, or in a failure leaf
    AlreadyComplete(StoryStatus),
    /// At least one component is not done
    NotReady(Vec<Blocker>),
    /// This call moved the story to the ready marker and fired the trigger
    Ready,
    /// Everything was done but another caller moved the story first
    Superseded,
    /// The registry could not be read or written; logged
    Failed(String),
}

impl CompletionCheck {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CompletionCheck::AlreadyEvaluating => "already_evaluating",
            CompletionCheck::StoryMissing => "story_missing",
            CompletionCheck::AlreadyComplete(_) => "already_complete",
            CompletionCheck::NotReady(_) => "not_ready",
            CompletionCheck::Ready => "ready",
            CompletionCheck::Superseded => "superseded",
            CompletionCheck::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CompletionCheck::Ready)
    }
}

/// The completion evaluator.
pub struct CompletionEvaluator {
    registry: Arc<dyn JobRegistry>,
    events: Arc<dyn EventSink>,
    trigger: Arc<dyn PhaseTrigger>,
    min_image_success_rate: f64,
    in_flight: InFlightGuard,
}

impl CompletionEvaluator {
    /// Create an evaluator using [`MIN_IMAGE_SUCCESS_RATE`].
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        events: Arc<dyn EventSink>,
        trigger: Arc<dyn PhaseTrigger>,
    ) -> Self {
        Self {
            registry,
            events,
            trigger,
            min_image_success_rate: MIN_IMAGE_SUCCESS_RATE,
            in_flight: InFlightGuard::new(),
        }
    }

    /// Override the image success threshold. Must be in `(0, 1]`.
    pub fn with_min_image_success_rate(mut self, rate: f64) -> WorkerResult<Self> {
        if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
            return Err(WorkerError::config_error(format!(
                "min_image_success_rate must be in (0, 1], got {}",
                rate
            )));
        }
        self.min_image_success_rate = rate;
        Ok(self)
    }

    pub fn min_image_success_rate(&self) -> f64 {
        self.min_image_success_rate
    }

    /// Evaluate a story and fire the next phase if it just became ready.
    ///
    /// Never returns an error; registry failures are logged and reported as
    /// [`CompletionCheck::Failed`].
    pub async fn check_story_completion(&self, story_id: &StoryId) -> CompletionCheck {
        let Some(mut token) = self.in_flight.try_enter(story_id) else {
            debug!(story_id = %story_id, "Completion check already running, skipping");
            metrics::record_completion_check(CompletionCheck::AlreadyEvaluating.label());
            return CompletionCheck::AlreadyEvaluating;
        };

        let mut check = self.evaluate_logged(story_id).await;
        // A skipped caller may have written a job after our reads.
        while matches!(check, CompletionCheck::NotReady(_) | CompletionCheck::Failed(_))
            && token.take_rerun()
        {
            debug!(story_id = %story_id, "Re-running completion check for skipped caller");
            check = self.evaluate_logged(story_id).await;
        }
        check
    }

    async fn evaluate_logged(&self, story_id: &StoryId) -> CompletionCheck {
        let check = match self.evaluate(story_id).await {
            Ok(check) => check,
            Err(e) => {
                error!(story_id = %story_id, "Completion check failed: {}", e);
                CompletionCheck::Failed(e.to_string())
            }
        };
        metrics::record_completion_check(check.label());
        check
    }

    async fn evaluate(&self, story_id: &StoryId) -> WorkerResult<CompletionCheck> {
        let Some(story) = self.registry.get_story(story_id).await? else {
            warn!(story_id = %story_id, "Story not found");
            return Ok(CompletionCheck::StoryMissing);
        };

        if story.status.has_reached(StoryStatus::READY) || story.status.is_failed() {
            debug!(
                story_id = %story_id,
                status = %story.status,
                "Story already past generation, nothing to do"
            );
            return Ok(CompletionCheck::AlreadyComplete(story.status));
        }

        let mut blockers = Vec::new();

        if !self.check_audio_completion(&story) {
            blockers.push(Blocker::AudioIncomplete);
        }
        if story.video_enabled {
            if let Some(blocker) = self.check_images_completion(story_id).await? {
                blockers.push(blocker);
            }
        }
        if !self.check_music_completion(story_id).await? {
            blockers.push(Blocker::MusicIncomplete);
        }

        if !blockers.is_empty() {
            let reasons: Vec<String> = blockers.iter().map(ToString::to_string).collect();
            info!(
                story_id = %story_id,
                status = %story.status,
                "Story not ready: {}",
                reasons.join("; ")
            );
            return Ok(CompletionCheck::NotReady(blockers));
        }

        let advanced = self
            .registry
            .advance_story_status(story_id, story.status, StoryStatus::READY)
            .await?;
        if !advanced {
            debug!(story_id = %story_id, "Story advanced by another caller");
            return Ok(CompletionCheck::Superseded);
        }

        metrics::record_story_ready();
        info!(
            story_id = %story_id,
            from = %story.status,
            "Story ready, starting next phase"
        );

        let event = StoryEvent::status_changed(story_id.clone(), story.status, StoryStatus::READY);
        if let Err(e) = self.events.publish(&event).await {
            warn!(story_id = %story_id, "Failed to publish status change: {}", e);
        }
        spawn_phase_trigger(Arc::clone(&self.trigger), story_id.clone());

        Ok(CompletionCheck::Ready)
    }

    /// Narration is done when it has a media reference and a completed status.
    fn check_audio_completion(&self, story: &Story) -> bool {
        story.narration.is_ready()
    }

    /// `None` when the image gate passes.
    async fn check_images_completion(&self, story_id: &StoryId) -> WorkerResult<Option<Blocker>> {
        let counts = self.registry.image_counts(story_id).await?;

        if counts.total == 0 {
            return Ok(Some(Blocker::NoImages));
        }
        // In-flight images block before the rate is looked at.
        if !counts.all_attempted() {
            return Ok(Some(Blocker::ImagesInFlight {
                in_flight: counts.in_flight,
                total: counts.total,
            }));
        }

        let rate = counts.success_rate().unwrap_or(0.0);
        metrics::record_image_success_rate(rate);

        if rate < self.min_image_success_rate {
            return Ok(Some(Blocker::ImageSuccessBelowThreshold {
                completed: counts.completed,
                total: counts.total,
                required: self.min_image_success_rate,
            }));
        }

        if counts.failed > 0 {
            info!(
                story_id = %story_id,
                completed = counts.completed,
                failed = counts.failed,
                "Accepting partial image set"
            );
        }
        Ok(None)
    }

    async fn check_music_completion(&self, story_id: &StoryId) -> WorkerResult<bool> {
        let music = self.registry.list_jobs(story_id, JobKind::Music).await?;
        Ok(music
            .iter()
            .any(|job| job.status == JobStatus::Completed && job.media_url.is_some()))
    }

    /// Progress snapshot for a story, or `None` if it does not exist.
    pub async fn progress(&self, story_id: &StoryId) -> WorkerResult<Option<StoryProgress>> {
        let Some(story) = self.registry.get_story(story_id).await? else {
            return Ok(None);
        };

        let images = if story.video_enabled {
            self.registry.image_counts(story_id).await?
        } else {
            ImageCounts::default()
        };
        let audio_segments_total = self
            .registry
            .count_by_status(story_id, JobKind::AudioSegment, &StatusFilter::Any)
            .await?;
        let audio_segments_completed = self
            .registry
            .count_by_status(
                story_id,
                JobKind::AudioSegment,
                &StatusFilter::one(JobStatus::Completed),
            )
            .await?;

        Ok(Some(StoryProgress {
            story_id: story.story_id.clone(),
            status: story.status,
            images,
            audio_segments_total,
            audio_segments_completed,
            music_ready: self.check_music_completion(story_id).await?,
            narration_ready: story.narration.is_ready(),
        }))
    }
}
