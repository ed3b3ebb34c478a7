//! Story event envelopes.
//!
//! Published to subscribers (web clients, the assembly service) whenever a
//! story or one of its jobs changes state.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobKind, JobStatus};
use crate::story::{StoryId, StoryStatus};

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoryEventKind {
    /// Story status moved forward
    StatusChanged { from: StoryStatus, to: StoryStatus },

    /// A job reached a terminal status
    JobResolved {
        #[serde(rename = "jobId")]
        job_id: JobId,
        kind: JobKind,
        status: JobStatus,
    },

    /// Generation is done enough; downstream assembly may start
    Ready,

    /// Something went wrong that needs attention
    Error { message: String },
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryEvent {
    #[serde(rename = "storyId")]
    pub story_id: StoryId,
    #[serde(flatten)]
    pub kind: StoryEventKind,
    pub timestamp: DateTime<Utc>,
}

impl StoryEvent {
    pub fn new(story_id: StoryId, kind: StoryEventKind) -> Self {
        Self {
            story_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn status_changed(story_id: StoryId, from: StoryStatus, to: StoryStatus) -> Self {
        Self::new(story_id, StoryEventKind::StatusChanged { from, to })
    }

    pub fn job_resolved(story_id: StoryId, job_id: JobId, kind: JobKind, status: JobStatus) -> Self {
        Self::new(
            story_id,
            StoryEventKind::JobResolved {
                job_id,
                kind,
                status,
            },
        )
    }

    pub fn ready(story_id: StoryId) -> Self {
        Self::new(story_id, StoryEventKind::Ready)
    }

    pub fn error(story_id: StoryId, message: impl Into<String>) -> Self {
        Self::new(
            story_id,
            StoryEventKind::Error {
                message: message.into(),
            },
        )
    }

    /// Short name of the event type, used for logging and metrics labels.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            StoryEventKind::StatusChanged { .. } => "status_changed",
            StoryEventKind::JobResolved { .. } => "job_resolved",
            StoryEventKind::Ready => "ready",
            StoryEventKind::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StoryEvent::status_changed(
            StoryId::from("story-1"),
            StoryStatus::ScriptCompleted,
            StoryStatus::AudioCompleted,
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["storyId"], "story-1");
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["to"], "audio_completed");

        let back: StoryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_ready_event_type() {
        let event = StoryEvent::ready(StoryId::from("story-2"));
        assert_eq!(event.type_name(), "ready");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ready");
    }
}
