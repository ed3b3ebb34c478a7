//! Story aggregate and its lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

/// Unique identifier for a story.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct StoryId(pub String);

impl StoryId {
    /// Generate a new random story ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Story lifecycle status.
///
/// The happy path is strictly ordered:
/// `pending → processing → script_completed → audio_completed → do_completed → completed`.
/// Each stage has a failure leaf which is terminal for automatic progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    /// Story request accepted, nothing dispatched yet
    #[default]
    Pending,
    /// Script generation in flight
    Processing,
    /// Script parsed, scene/shot/music jobs dispatched
    ScriptCompleted,
    /// Audio, images and music done enough; ready for mixing and assembly
    AudioCompleted,
    /// Video rendered, not yet published
    DoCompleted,
    /// Fully published
    Completed,
    /// Script generation failed
    ScriptFailed,
    /// Narration could not be produced
    AudioFailed,
    /// Video rendering failed
    DoFailed,
    /// Publishing failed
    Failed,
}

/// Rejected story status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid story status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: StoryStatus,
    pub to: StoryStatus,
}

impl StoryStatus {
    /// Every status, in declaration order.
    pub const ALL: [StoryStatus; 10] = [
        StoryStatus::Pending,
        StoryStatus::Processing,
        StoryStatus::ScriptCompleted,
        StoryStatus::AudioCompleted,
        StoryStatus::DoCompleted,
        StoryStatus::Completed,
        StoryStatus::ScriptFailed,
        StoryStatus::AudioFailed,
        StoryStatus::DoFailed,
        StoryStatus::Failed,
    ];

    /// Status written by the completion evaluator once generation is done enough.
    pub const READY: StoryStatus = StoryStatus::AudioCompleted;

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::Processing => "processing",
            StoryStatus::ScriptCompleted => "script_completed",
            StoryStatus::AudioCompleted => "audio_completed",
            StoryStatus::DoCompleted => "do_completed",
            StoryStatus::Completed => "completed",
            StoryStatus::ScriptFailed => "script_failed",
            StoryStatus::AudioFailed => "audio_failed",
            StoryStatus::DoFailed => "do_failed",
            StoryStatus::Failed => "failed",
        }
    }

    /// True for the `*_failed` leaves.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            StoryStatus::ScriptFailed
                | StoryStatus::AudioFailed
                | StoryStatus::DoFailed
                | StoryStatus::Failed
        )
    }

    /// Check if this is a terminal state (no automatic transition leaves it).
    pub fn is_terminal(&self) -> bool {
        *self == StoryStatus::Completed || self.is_failed()
    }

    /// Position on the happy path. Failure leaves sit at the stage they abort.
    fn rank(&self) -> u8 {
        match self {
            StoryStatus::Pending => 0,
            StoryStatus::Processing | StoryStatus::ScriptFailed => 1,
            StoryStatus::ScriptCompleted | StoryStatus::AudioFailed => 2,
            StoryStatus::AudioCompleted | StoryStatus::DoFailed => 3,
            StoryStatus::DoCompleted | StoryStatus::Failed => 4,
            StoryStatus::Completed => 5,
        }
    }

    /// True once the story has crossed `other` on the happy path.
    ///
    /// Failure leaves never count as having reached a success stage.
    pub fn has_reached(&self, other: StoryStatus) -> bool {
        !self.is_failed() && self.rank() >= other.rank()
    }

    /// Forward-only transition table.
    ///
    /// Success stages may only move to a later success stage (skipping is
    /// allowed, e.g. audio-only stories go `audio_completed → completed`).
    /// A failure leaf is reachable from any non-terminal status that has not
    /// yet passed the stage the leaf belongs to.
    pub fn can_transition_to(&self, next: StoryStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        if next.is_failed() {
            self.rank() <= next.rank()
        } else {
            next.rank() > self.rank()
        }
    }

    /// Validate a transition, returning the target on success.
    pub fn transition(self, next: StoryStatus) -> Result<StoryStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoryStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown story status: {}", s))
    }
}

/// The story's collective narration track (all scene segments mixed together).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct NarrationTrack {
    /// Collective audio status
    #[serde(default)]
    pub status: JobStatus,
    /// Blob store URL of the assembled narration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Measured duration of the assembled narration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl NarrationTrack {
    /// Narration assembled and uploaded.
    pub fn completed(media_url: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            status: JobStatus::Completed,
            media_url: Some(media_url.into()),
            duration_secs: Some(duration_secs),
        }
    }

    /// Narration could not be assembled.
    pub fn failed() -> Self {
        Self {
            status: JobStatus::Failed,
            media_url: None,
            duration_secs: None,
        }
    }

    /// Audio is ready only when both the marker and a media reference exist.
    pub fn is_ready(&self) -> bool {
        self.status == JobStatus::Completed && self.media_url.is_some()
    }
}

/// Story aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Story {
    /// Unique story ID
    pub story_id: StoryId,

    /// Owner
    pub user_id: String,

    /// Prompt the story was generated from
    pub prompt: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: StoryStatus,

    /// False for audio-only podcast episodes
    #[serde(default = "default_video_enabled")]
    pub video_enabled: bool,

    /// Requested episode length
    pub target_duration_secs: u32,

    /// Collective narration audio
    #[serde(default)]
    pub narration: NarrationTrack,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Timestamp of the ready transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
}

fn default_video_enabled() -> bool {
    true
}

impl Story {
    /// Create a new story record in `pending` status.
    pub fn new(
        story_id: StoryId,
        user_id: impl Into<String>,
        prompt: impl Into<String>,
        target_duration_secs: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            story_id,
            user_id: user_id.into(),
            prompt: prompt.into(),
            status: StoryStatus::Pending,
            video_enabled: true,
            target_duration_secs,
            narration: NarrationTrack::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
        }
    }

    /// Mark as audio-only.
    pub fn audio_only(mut self) -> Self {
        self.video_enabled = false;
        self
    }

    /// Apply a status transition, refusing anything but forward moves.
    pub fn advance(&mut self, next: StoryStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(next)?;
        self.updated_at = Utc::now();
        if next == StoryStatus::READY {
            self.ready_at = Some(self.updated_at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_forward_only() {
        let path = [
            StoryStatus::Pending,
            StoryStatus::Processing,
            StoryStatus::ScriptCompleted,
            StoryStatus::AudioCompleted,
            StoryStatus::DoCompleted,
            StoryStatus::Completed,
        ];

        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            assert!(!pair[1].can_transition_to(pair[0]), "{} -> {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_completed_never_regresses() {
        for status in StoryStatus::ALL {
            assert!(!StoryStatus::Completed.can_transition_to(status));
        }
    }

    #[test]
    fn test_failure_leaves() {
        assert!(StoryStatus::Processing.can_transition_to(StoryStatus::ScriptFailed));
        assert!(StoryStatus::ScriptCompleted.can_transition_to(StoryStatus::AudioFailed));
        assert!(StoryStatus::Pending.can_transition_to(StoryStatus::AudioFailed));
        // Audio is already done, its failure leaf is out of reach.
        assert!(!StoryStatus::AudioCompleted.can_transition_to(StoryStatus::AudioFailed));
        assert!(StoryStatus::AudioCompleted.can_transition_to(StoryStatus::DoFailed));

        // Failure leaves are terminal.
        assert!(StoryStatus::AudioFailed.is_terminal());
        assert!(!StoryStatus::AudioFailed.can_transition_to(StoryStatus::AudioCompleted));
    }

    #[test]
    fn test_audio_only_may_skip_render() {
        assert!(StoryStatus::AudioCompleted.can_transition_to(StoryStatus::Completed));
    }

    #[test]
    fn test_has_reached() {
        assert!(StoryStatus::DoCompleted.has_reached(StoryStatus::READY));
        assert!(StoryStatus::AudioCompleted.has_reached(StoryStatus::READY));
        assert!(!StoryStatus::ScriptCompleted.has_reached(StoryStatus::READY));
        assert!(!StoryStatus::DoFailed.has_reached(StoryStatus::READY));
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in StoryStatus::ALL {
            assert_eq!(status.as_str().parse::<StoryStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("ready".parse::<StoryStatus>().is_err());
    }

    #[test]
    fn test_story_advance_sets_ready_at() {
        let mut story = Story::new(StoryId::new(), "user-1", "a tale", 120);
        story.advance(StoryStatus::Processing).unwrap();
        story.advance(StoryStatus::ScriptCompleted).unwrap();
        assert!(story.ready_at.is_none());

        story.advance(StoryStatus::AudioCompleted).unwrap();
        assert!(story.ready_at.is_some());

        let err = story.advance(StoryStatus::Processing).unwrap_err();
        assert_eq!(err.from, StoryStatus::AudioCompleted);
        assert_eq!(story.status, StoryStatus::AudioCompleted);
    }

    #[test]
    fn test_narration_ready_requires_url() {
        let mut track = NarrationTrack::default();
        assert!(!track.is_ready());

        track.status = JobStatus::Completed;
        assert!(!track.is_ready());

        let track = NarrationTrack::completed("https://cdn/story/narration.mp3", 93.5);
        assert!(track.is_ready());
    }
}
