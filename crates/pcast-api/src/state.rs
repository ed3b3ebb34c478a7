//! Application state.

use std::sync::Arc;

use pcast_events::RedisEventPublisher;
use pcast_registry::RedisRegistry;
use pcast_storage::{BlobStore, R2Client};
use pcast_worker::{Collaborators, FfmpegEncoder, HttpDispatcher, StoryContext, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Arc<StoryContext>,
    pub blob: Arc<dyn BlobStore>,
}

impl AppState {
    /// Create application state backed by Redis, R2 and the generation gateway.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let worker_config = WorkerConfig::from_env();

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let registry = Arc::new(RedisRegistry::from_env()?);
        let events = Arc::new(RedisEventPublisher::new(&redis_url)?);
        let blob: Arc<dyn BlobStore> = Arc::new(R2Client::from_env()?);

        let http = reqwest::Client::new();
        let generator = Arc::new(HttpDispatcher::from_env()?);
        let encoder = Arc::new(FfmpegEncoder::new(http.clone(), &worker_config.work_dir));

        let pipeline = StoryContext::new(
            worker_config,
            Collaborators {
                registry,
                events,
                blob: Arc::clone(&blob),
                generator,
                encoder,
                trigger: None,
                status_source: None,
                http: Some(http),
            },
        )?;

        Ok(Self::from_parts(config, Arc::new(pipeline), blob))
    }

    /// Assemble state from prebuilt parts.
    pub fn from_parts(
        config: ApiConfig,
        pipeline: Arc<StoryContext>,
        blob: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            pipeline,
            blob,
        }
    }
}
