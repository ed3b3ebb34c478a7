//! Wiring of the story pipeline.

use std::sync::Arc;

use pcast_events::EventSink;
use pcast_registry::JobRegistry;
use pcast_storage::BlobStore;

use crate::completion::CompletionHandler;
use crate::config::WorkerConfig;
use crate::dispatch::{GenerationDispatcher, StoryDispatcher};
use crate::error::WorkerResult;
use crate::evaluator::CompletionEvaluator;
use crate::media::MediaRehoster;
use crate::narration::{MediaEncoder, NarrationAssembler};
use crate::poller::{JobStatusSource, RegistryStatusSource};
use crate::retry::RetryConfig;
use crate::trigger::{EventPhaseTrigger, PhaseTrigger};

/// External collaborators the pipeline is built from.
pub struct Collaborators {
    pub registry: Arc<dyn JobRegistry>,
    pub events: Arc<dyn EventSink>,
    pub blob: Arc<dyn BlobStore>,
    pub generator: Arc<dyn GenerationDispatcher>,
    pub encoder: Arc<dyn MediaEncoder>,
    /// Defaults to publishing a `ready` event
    pub trigger: Option<Arc<dyn PhaseTrigger>>,
    /// Defaults to reading outcomes back from the registry
    pub status_source: Option<Arc<dyn JobStatusSource>>,
    /// Client for re-hosting vendor media; `None` records vendor URLs as-is
    pub http: Option<reqwest::Client>,
}

/// Shared handles for one worker or API process.
pub struct StoryContext {
    pub config: WorkerConfig,
    pub registry: Arc<dyn JobRegistry>,
    pub events: Arc<dyn EventSink>,
    pub evaluator: Arc<CompletionEvaluator>,
    pub narration: Arc<NarrationAssembler>,
    pub handler: Arc<CompletionHandler>,
    pub dispatcher: Arc<StoryDispatcher>,
}

impl StoryContext {
    pub fn new(config: WorkerConfig, deps: Collaborators) -> WorkerResult<Self> {
        config.validate()?;

        let trigger = deps.trigger.unwrap_or_else(|| {
            Arc::new(EventPhaseTrigger::new(Arc::clone(&deps.events))) as Arc<dyn PhaseTrigger>
        });
        let status_source = deps.status_source.unwrap_or_else(|| {
            Arc::new(RegistryStatusSource::new(Arc::clone(&deps.registry))) as Arc<dyn JobStatusSource>
        });

        let evaluator = Arc::new(
            CompletionEvaluator::new(Arc::clone(&deps.registry), Arc::clone(&deps.events), trigger)
                .with_min_image_success_rate(config.min_image_success_rate)?,
        );

        let narration = Arc::new(
            NarrationAssembler::new(
                Arc::clone(&deps.registry),
                Arc::clone(&deps.blob),
                deps.encoder,
                Arc::clone(&deps.events),
            )
            .with_upload_retry(
                RetryConfig::new("narration_upload")
                    .with_max_retries(config.dispatch_max_retries)
                    .with_base_delay(config.dispatch_retry_base_delay),
            ),
        );

        let mut handler = CompletionHandler::new(
            Arc::clone(&deps.registry),
            Arc::clone(&deps.events),
            Arc::clone(&evaluator),
            Arc::clone(&narration),
        );
        if config.rehost_media {
            if let Some(http) = deps.http {
                handler = handler.with_rehoster(MediaRehoster::new(Arc::clone(&deps.blob), http));
            }
        }
        let handler = Arc::new(handler);

        let dispatcher = Arc::new(StoryDispatcher::new(
            &config,
            Arc::clone(&deps.registry),
            Arc::clone(&deps.events),
            deps.generator,
            Arc::clone(&handler),
            status_source,
        )?);

        Ok(Self {
            config,
            registry: deps.registry,
            events: deps.events,
            evaluator,
            narration,
            handler,
            dispatcher,
        })
    }
}
