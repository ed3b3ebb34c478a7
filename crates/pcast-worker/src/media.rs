//! Copies vendor media into the blob store.
//!
//! Vendor URLs are short-lived, so completed media is re-uploaded under the
//! story's own key before it is recorded.

use std::sync::Arc;

use tracing::debug;

use pcast_models::{Job, JobKind};
use pcast_storage::keys::{content_type_for, job_media_key};
use pcast_storage::{BlobStore, StorageError};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async_if, RetryConfig};

const KNOWN_EXTENSIONS: [&str; 6] = ["mp3", "wav", "png", "jpg", "jpeg", "webp"];

/// Downloads vendor media and stores it under the story's key layout.
pub struct MediaRehoster {
    blob: Arc<dyn BlobStore>,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl MediaRehoster {
    pub fn new(blob: Arc<dyn BlobStore>, http: reqwest::Client) -> Self {
        Self {
            blob,
            http,
            retry: RetryConfig::new("media_rehost"),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Copy `source_url` into the blob store; returns the stored URL.
    pub async fn rehost(&self, user_id: &str, job: &Job, source_url: &str) -> WorkerResult<String> {
        let extension = extension_for(job.kind(), source_url);

        let bytes = retry_async_if(
            &self.retry,
            || self.fetch(source_url),
            WorkerError::is_retryable,
        )
        .await
        .into_result()?;

        let key = job_media_key(user_id, &job.story_id, &job.details, extension);
        debug!(job_id = %job.job_id, "Re-hosting {} bytes as {}", bytes.len(), key);

        let url = retry_async_if(
            &self.retry,
            || self.blob.upload(bytes.clone(), &key, content_type_for(extension)),
            StorageError::is_retryable,
        )
        .await
        .into_result()?;

        Ok(url)
    }

    async fn fetch(&self, url: &str) -> WorkerResult<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(WorkerError::dispatch_failed(format!("media fetch returned {}", status)));
        }
        if !status.is_success() {
            return Err(WorkerError::rejected(format!("media fetch returned {}", status)));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// File extension for stored media: the source URL's if recognised,
/// otherwise the kind's default.
pub fn extension_for(kind: JobKind, source_url: &str) -> &'static str {
    let path = source_url.split(['?', '#']).next().unwrap_or_default();
    let from_url = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    if let Some(ext) = from_url {
        if let Some(known) = KNOWN_EXTENSIONS.iter().find(|k| **k == ext) {
            return *known;
        }
    }

    match kind {
        JobKind::AudioSegment | JobKind::Music => "mp3",
        JobKind::Image | JobKind::Anchor => "png",
        JobKind::Script => "json",
    }
}
