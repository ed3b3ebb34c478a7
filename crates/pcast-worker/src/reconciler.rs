//! Event-driven completion reconciler.
//!
//! Webhooks for one story can land on different API instances. Each instance
//! evaluates the story it just touched, but a check skipped on one instance
//! is not re-run by another. The reconciler listens to every story's events
//! and re-evaluates on each resolved job, so the last resolution always gets
//! a check somewhere.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pcast_events::RedisEventPublisher;
use pcast_models::{StoryEvent, StoryEventKind};

use crate::error::WorkerResult;
use crate::evaluator::CompletionEvaluator;
use crate::retry::FailureTracker;

pub type EventStream = Pin<Box<dyn Stream<Item = StoryEvent> + Send>>;

/// A subscription to every story's events.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self) -> WorkerResult<EventStream>;
}

#[async_trait]
impl EventSource for RedisEventPublisher {
    async fn subscribe(&self) -> WorkerResult<EventStream> {
        Ok(self.subscribe_all().await?)
    }
}

/// Re-runs completion checks for stories whose jobs resolved.
pub struct Reconciler {
    evaluator: Arc<CompletionEvaluator>,
    source: Arc<dyn EventSource>,
    reconnect_delay: Duration,
    shutdown: watch::Sender<bool>,
}

impl Reconciler {
    pub fn new(evaluator: Arc<CompletionEvaluator>, source: Arc<dyn EventSource>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            evaluator,
            source,
            reconnect_delay: Duration::from_secs(5),
            shutdown,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Consume events until shut down, resubscribing when the stream drops.
    pub async fn run(&self) -> WorkerResult<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(5);

        info!("Starting completion reconciler");

        while !*shutdown_rx.borrow() {
            match self.source.subscribe().await {
                Ok(mut stream) => {
                    failures.record_success();
                    debug!("Subscribed to story events");

                    loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    info!("Shutdown signal received, stopping reconciler");
                                    return Ok(());
                                }
                            }
                            next = stream.next() => match next {
                                Some(event) => self.handle(event).await,
                                None => {
                                    warn!("Event stream ended, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Failed to subscribe to story events: {}", e);
                    }
                }
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!("Completion reconciler stopped");
        Ok(())
    }

    async fn handle(&self, event: StoryEvent) {
        if let StoryEventKind::JobResolved { job_id, kind, .. } = &event.kind {
            let check = self.evaluator.check_story_completion(&event.story_id).await;
            debug!(
                story_id = %event.story_id,
                job_id = %job_id,
                kind = %kind,
                result = check.label(),
                "Reconciled story"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use pcast_events::MemoryEventSink;
    use pcast_models::{
        Job, JobKind, JobOutcome, JobStatus, NarrationTrack, Story, StoryId, StoryStatus,
    };
    use pcast_registry::{JobRegistry, MemoryRegistry};

    use crate::error::WorkerError;
    use crate::trigger::EventPhaseTrigger;

    /// Replays a fixed batch once, then fails every later subscription.
    struct ReplaySource {
        events: Vec<StoryEvent>,
        subscriptions: AtomicU32,
    }

    #[async_trait]
    impl EventSource for ReplaySource {
        async fn subscribe(&self) -> WorkerResult<EventStream> {
            if self.subscriptions.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Box::pin(futures_util::stream::iter(self.events.clone())))
            } else {
                Err(WorkerError::processing_failed("connection refused"))
            }
        }
    }

    #[tokio::test]
    async fn test_resolved_job_event_completes_story() {
        let registry = Arc::new(MemoryRegistry::new());
        let events = Arc::new(MemoryEventSink::new());

        let story = Story::new(StoryId::new(), "user-1", "a night ferry", 60).audio_only();
        registry.create_story(&story).await.unwrap();
        registry
            .set_narration(&story.story_id, NarrationTrack::completed("https://cdn/n.mp3", 60.0))
            .await
            .unwrap();
        let music = Job::music(story.story_id.clone());
        registry.create_job(&music).await.unwrap();
        registry
            .mark_job_terminal(&music.job_id, &JobOutcome::completed("https://cdn/m.mp3"))
            .await
            .unwrap();

        let evaluator = Arc::new(CompletionEvaluator::new(
            registry.clone(),
            events.clone(),
            Arc::new(EventPhaseTrigger::new(events.clone())),
        ));
        let source = Arc::new(ReplaySource {
            events: vec![
                StoryEvent::status_changed(story.story_id.clone(), StoryStatus::Pending, StoryStatus::ScriptCompleted),
                StoryEvent::job_resolved(story.story_id.clone(), music.job_id.clone(), JobKind::Music, JobStatus::Completed),
            ],
            subscriptions: AtomicU32::new(0),
        });

        let reconciler = Arc::new(
            Reconciler::new(evaluator, source.clone()).with_reconnect_delay(Duration::from_millis(5)),
        );
        let runner = {
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move { reconciler.run().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        reconciler.shutdown();
        runner.await.unwrap().unwrap();

        let stored = registry.get_story(&story.story_id).await.unwrap().unwrap();
        assert_eq!(stored.status, StoryStatus::READY);
        assert!(source.subscriptions.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let registry = Arc::new(MemoryRegistry::new());
        let events = Arc::new(MemoryEventSink::new());
        let evaluator = Arc::new(CompletionEvaluator::new(
            registry.clone(),
            events.clone(),
            Arc::new(EventPhaseTrigger::new(events.clone())),
        ));
        let reconciler = Reconciler::new(
            evaluator,
            Arc::new(ReplaySource {
                events: Vec::new(),
                subscriptions: AtomicU32::new(0),
            }),
        );

        reconciler
            .handle(StoryEvent::error(StoryId::new(), "vendor outage"))
            .await;
        reconciler.handle(StoryEvent::ready(StoryId::new())).await;
        assert!(events.events().await.is_empty());
    }
}
