//! Event sink contract.

use async_trait::async_trait;
use tokio::sync::Mutex;

use pcast_models::{StoryEvent, StoryId};

use crate::error::EventResult;

/// Destination for story events.
///
/// Publishing is best-effort: callers log failures and carry on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &StoryEvent) -> EventResult<()>;
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: &StoryEvent) -> EventResult<()> {
        Ok(())
    }
}

/// Sink that records events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<StoryEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far.
    pub async fn events(&self) -> Vec<StoryEvent> {
        self.events.lock().await.clone()
    }

    /// Events published for one story.
    pub async fn events_for(&self, story_id: &StoryId) -> Vec<StoryEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| &e.story_id == story_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: &StoryEvent) -> EventResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_filters_by_story() {
        let sink = MemoryEventSink::new();
        let a = StoryId::from("a");
        let b = StoryId::from("b");

        sink.publish(&StoryEvent::ready(a.clone())).await.unwrap();
        sink.publish(&StoryEvent::error(b.clone(), "boom")).await.unwrap();
        sink.publish(&StoryEvent::ready(a.clone())).await.unwrap();

        assert_eq!(sink.events().await.len(), 3);
        assert_eq!(sink.events_for(&a).await.len(), 2);
        assert_eq!(sink.events_for(&b).await[0].type_name(), "error");
    }
}
