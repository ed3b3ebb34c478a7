//! Phase trigger: hand a ready story to the next pipeline phase.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use pcast_events::EventSink;
use pcast_models::{StoryEvent, StoryId};

use crate::error::WorkerResult;
use crate::metrics;

/// Starts the next phase (mixing and assembly) for a ready story.
#[async_trait]
pub trait PhaseTrigger: Send + Sync {
    async fn on_story_ready(&self, story_id: &StoryId) -> WorkerResult<()>;
}

/// Run the trigger on a detached task.
///
/// The caller does not wait. A failure is logged and counted; the story
/// status is left where it is.
pub fn spawn_phase_trigger(trigger: Arc<dyn PhaseTrigger>, story_id: StoryId) -> JoinHandle<()> {
    tokio::spawn(async move {
        match trigger.on_story_ready(&story_id).await {
            Ok(()) => info!(story_id = %story_id, "Next phase started"),
            Err(e) => {
                metrics::record_trigger_failure();
                error!(story_id = %story_id, "Phase trigger failed: {}", e);
            }
        }
    })
}

/// Announces readiness on the event bus; the assembly service listens there.
pub struct EventPhaseTrigger {
    events: Arc<dyn EventSink>,
}

impl EventPhaseTrigger {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl PhaseTrigger for EventPhaseTrigger {
    async fn on_story_ready(&self, story_id: &StoryId) -> WorkerResult<()> {
        self.events.publish(&StoryEvent::ready(story_id.clone())).await?;
        Ok(())
    }
}
