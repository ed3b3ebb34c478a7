//! Narration assembly.
//!
//! Per-scene audio segments resolve independently. Once every segment is
//! terminal the story gets one narration track: the segments joined in
//! scene order when all of them completed, or a failed track (and the
//! story moved to `audio_failed`) when any did not.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use pcast_events::EventSink;
use pcast_models::{
    JobDetails, JobKind, JobStatus, NarrationTrack, Story, StoryEvent, StoryId, StoryStatus,
};
use pcast_registry::JobRegistry;
use pcast_storage::keys::narration_key;
use pcast_storage::{BlobStore, StorageError};

use crate::error::{WorkerError, WorkerResult};
use crate::guard::InFlightGuard;
use crate::logging::StoryLogger;
use crate::metrics;
use crate::retry::{retry_async_if, RetryConfig};

/// One segment to join.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub url: String,
    /// Reported duration, if the vendor gave one
    pub duration_secs: Option<f64>,
}

/// Joined audio.
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub duration_secs: f64,
}

/// Audio transcoding collaborator.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Join segments, in the order given, into one MP3.
    async fn concat_audio(&self, segments: &[AudioInput]) -> WorkerResult<EncodedAudio>;
}

/// What an assembly attempt found.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrationState {
    /// Segments still in flight
    Waiting { remaining: usize },
    /// Another assembly of this story is running in this process
    InProgress,
    /// Narration was already completed or failed
    AlreadyResolved,
    /// Track assembled and stored
    Assembled { media_url: String },
    /// Narration failed; story moved to `audio_failed`
    Failed { reason: String },
}

/// Builds a story's narration track from its audio segments.
pub struct NarrationAssembler {
    registry: Arc<dyn JobRegistry>,
    blob: Arc<dyn BlobStore>,
    encoder: Arc<dyn MediaEncoder>,
    events: Arc<dyn EventSink>,
    upload_retry: RetryConfig,
    in_flight: InFlightGuard,
}

impl NarrationAssembler {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        blob: Arc<dyn BlobStore>,
        encoder: Arc<dyn MediaEncoder>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            blob,
            encoder,
            events,
            upload_retry: RetryConfig::new("narration_upload"),
            in_flight: InFlightGuard::new(),
        }
    }

    pub fn with_upload_retry(mut self, retry: RetryConfig) -> Self {
        self.upload_retry = retry;
        self
    }

    /// Assemble narration if every segment is terminal; otherwise do nothing.
    pub async fn assemble_if_ready(&self, story_id: &StoryId) -> WorkerResult<NarrationState> {
        let Some(mut token) = self.in_flight.try_enter(story_id) else {
            return Ok(NarrationState::InProgress);
        };

        let mut state = self.assemble(story_id).await?;
        while matches!(state, NarrationState::Waiting { .. }) && token.take_rerun() {
            state = self.assemble(story_id).await?;
        }
        Ok(state)
    }

    async fn assemble(&self, story_id: &StoryId) -> WorkerResult<NarrationState> {
        let story = self
            .registry
            .get_story(story_id)
            .await?
            .ok_or_else(|| WorkerError::StoryNotFound(story_id.to_string()))?;

        if story.narration.status.is_terminal() {
            return Ok(NarrationState::AlreadyResolved);
        }

        let mut segments = self.registry.list_jobs(story_id, JobKind::AudioSegment).await?;
        let remaining = segments.iter().filter(|s| !s.status.is_terminal()).count();
        if segments.is_empty() || remaining > 0 {
            debug!(story_id = %story_id, remaining = remaining, "Narration waiting on segments");
            return Ok(NarrationState::Waiting { remaining });
        }

        if let Some(failed) = segments.iter().find(|s| s.status == JobStatus::Failed) {
            let reason = format!(
                "scene {} narration failed: {}",
                failed.details.scene_id().unwrap_or_default(),
                failed.error_message.as_deref().unwrap_or("unknown error")
            );
            return self.fail(&story, reason).await;
        }

        segments.sort_by_key(|s| match s.details {
            JobDetails::AudioSegment { scene_number, .. } => scene_number,
            _ => u32::MAX,
        });

        let mut inputs = Vec::with_capacity(segments.len());
        for segment in &segments {
            let Some(url) = &segment.media_url else {
                return self
                    .fail(&story, format!("segment {} completed without media", segment.job_id))
                    .await;
            };
            inputs.push(AudioInput {
                url: url.clone(),
                duration_secs: segment.duration_secs,
            });
        }

        let logger = StoryLogger::new(story_id, "narration");
        logger.log_start(&format!("joining {} segments", inputs.len()));

        let encoded = match self.encoder.concat_audio(&inputs).await {
            Ok(encoded) => encoded,
            Err(e) => return self.fail(&story, format!("narration encoding failed: {}", e)).await,
        };
        let duration_secs = encoded.duration_secs;

        let key = narration_key(&story.user_id, story_id);
        let uploaded = retry_async_if(
            &self.upload_retry,
            || self.blob.upload(encoded.bytes.clone(), &key, "audio/mpeg"),
            StorageError::is_retryable,
        )
        .await
        .into_result();
        let media_url = match uploaded {
            Ok(url) => url,
            Err(e) => return self.fail(&story, format!("narration upload failed: {}", e)).await,
        };

        self.registry
            .set_narration(story_id, NarrationTrack::completed(media_url.clone(), duration_secs))
            .await?;
        metrics::record_narration_duration(duration_secs);
        logger.log_completion(&format!("{:.1}s narration at {}", duration_secs, media_url));

        Ok(NarrationState::Assembled { media_url })
    }

    async fn fail(&self, story: &Story, reason: String) -> WorkerResult<NarrationState> {
        StoryLogger::new(&story.story_id, "narration").log_error(&reason);

        self.registry
            .set_narration(&story.story_id, NarrationTrack::failed())
            .await?;

        if self
            .registry
            .update_story_status(&story.story_id, StoryStatus::AudioFailed)
            .await?
        {
            info!(story_id = %story.story_id, "Story moved to audio_failed");
            for event in [
                StoryEvent::status_changed(story.story_id.clone(), story.status, StoryStatus::AudioFailed),
                StoryEvent::error(story.story_id.clone(), reason.clone()),
            ] {
                if let Err(e) = self.events.publish(&event).await {
                    warn!(story_id = %story.story_id, "Failed to publish {}: {}", event.type_name(), e);
                }
            }
        }

        Ok(NarrationState::Failed { reason })
    }
}
