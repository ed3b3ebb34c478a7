//! Story events via Redis Pub/Sub.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use pcast_models::{StoryEvent, StoryId};

use crate::error::EventResult;
use crate::sink::EventSink;

/// Channel receiving every story's events (the assembly service listens here).
pub const ALL_STORIES_CHANNEL: &str = "stories:events";

/// Publisher for story events.
pub struct RedisEventPublisher {
    client: redis::Client,
}

impl RedisEventPublisher {
    /// Create a new publisher.
    pub fn new(redis_url: &str) -> EventResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a story.
    pub fn channel_name(story_id: &StoryId) -> String {
        format!("story:{}:events", story_id)
    }

    /// Subscribe to events for one story.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        story_id: &StoryId,
    ) -> EventResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = StoryEvent> + Send>>> {
        self.subscribe_channel(&Self::channel_name(story_id)).await
    }

    /// Subscribe to events for every story.
    pub async fn subscribe_all(
        &self,
    ) -> EventResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = StoryEvent> + Send>>> {
        self.subscribe_channel(ALL_STORIES_CHANNEL).await
    }

    async fn subscribe_channel(
        &self,
        channel: &str,
    ) -> EventResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = StoryEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl EventSink for RedisEventPublisher {
    /// Publish to the story's own channel and to the all-stories channel.
    async fn publish(&self, event: &StoryEvent) -> EventResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.story_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing {} event to {}", event.type_name(), channel);
        conn.publish::<_, _, ()>(&channel, &payload).await?;
        conn.publish::<_, _, ()>(ALL_STORIES_CHANNEL, &payload).await?;

        Ok(())
    }
}
