//! Aggregate progress counts for a story.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::story::{StoryId, StoryStatus};

/// Live image counts for one story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ImageCounts {
    /// Every dispatched image
    pub total: u64,
    /// Images with a media reference
    pub completed: u64,
    /// Images that terminally failed
    pub failed: u64,
    /// Images still pending, processing or generating
    pub in_flight: u64,
}

impl ImageCounts {
    /// True when no image is still waiting on a vendor.
    ///
    /// Zero dispatched images never counts as attempted.
    pub fn all_attempted(&self) -> bool {
        self.total > 0 && self.in_flight == 0
    }

    /// Completed share of dispatched images, `None` when nothing was dispatched.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.completed as f64 / self.total as f64)
        }
    }
}

/// Snapshot served to progress pollers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoryProgress {
    pub story_id: StoryId,
    pub status: StoryStatus,
    pub images: ImageCounts,
    pub audio_segments_total: u64,
    pub audio_segments_completed: u64,
    pub music_ready: bool,
    pub narration_ready: bool,
}
