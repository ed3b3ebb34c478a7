//! Structured story logging.
//!
//! Every stage of a story (dispatch, narration) logs its start, progress
//! and end with the same fields, so one story can be followed through the
//! logs by `story_id`.

use std::time::Instant;

use tracing::{error, info, warn, Span};

use pcast_models::StoryId;

/// Logger for one stage of one story.
#[derive(Debug, Clone)]
pub struct StoryLogger {
    story_id: StoryId,
    stage: &'static str,
    started: Instant,
}

impl StoryLogger {
    /// Create a logger; the stage clock starts now.
    ///
    /// # Arguments
    /// * `story_id` - The story being worked on
    /// * `stage` - Pipeline stage (e.g. "dispatch", "narration")
    pub fn new(story_id: &StoryId, stage: &'static str) -> Self {
        Self {
            story_id: story_id.clone(),
            stage,
            started: Instant::now(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(story_id = %self.story_id, stage = self.stage, "Stage started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            story_id = %self.story_id,
            stage = self.stage,
            elapsed_ms = self.elapsed_ms(),
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(story_id = %self.story_id, stage = self.stage, "Stage warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(
            story_id = %self.story_id,
            stage = self.stage,
            elapsed_ms = self.elapsed_ms(),
            "Stage failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            story_id = %self.story_id,
            stage = self.stage,
            elapsed_ms = self.elapsed_ms(),
            "Stage finished: {}", message
        );
    }

    pub fn story_id(&self) -> &StoryId {
        &self.story_id
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Milliseconds since the logger was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Span covering the stage.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("story_stage", story_id = %self.story_id, stage = self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_keeps_story_and_stage() {
        let story_id = StoryId::from("story-7");
        let logger = StoryLogger::new(&story_id, "narration");

        assert_eq!(logger.story_id(), &story_id);
        assert_eq!(logger.stage(), "narration");
        assert!(logger.elapsed_ms() < 60_000);
    }
}
