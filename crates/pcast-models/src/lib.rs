//! Shared data models for the Storycast backend.
//!
//! This crate provides Serde-serializable types for:
//! - Stories and their forward-only lifecycle
//! - Independently completing generation jobs (script, audio, images, anchors, music)
//! - Aggregate progress counts used by the completion evaluator
//! - Story event envelopes published to subscribers

pub mod event;
pub mod job;
pub mod progress;
pub mod story;

// Re-export common types
pub use event::{StoryEvent, StoryEventKind};
pub use job::{
    AnchorType, GenerationOutcome, Job, JobDetails, JobId, JobKind, JobOutcome, JobStatus,
    OutcomeStatus, StatusFilter, ANCHOR_MIN_APPEARANCES,
};
pub use progress::{ImageCounts, StoryProgress};
pub use story::{NarrationTrack, Story, StoryId, StoryStatus, TransitionError};
