//! Redis-backed job registry.
//!
//! Stories and jobs are stored as JSON documents. Every mutation is an
//! optimistic read-modify-write: the new document is only written if the
//! stored document is still byte-identical to the one that was read (checked
//! atomically by a Lua script). This makes the forward-only status rule and
//! first-terminal-wins job resolution hold across processes, not just within
//! one.

use async_trait::async_trait;
use metrics::counter;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use pcast_models::{
    Job, JobId, JobKind, JobOutcome, NarrationTrack, StatusFilter, Story, StoryId, StoryStatus,
};

use crate::error::{RegistryError, RegistryResult};
use crate::registry::JobRegistry;

/// Attempts before a contended compare-and-set gives up.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Writes ARGV[2] only if the key still holds ARGV[1].
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written by the registry
    pub key_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "pcast".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("REGISTRY_KEY_PREFIX").unwrap_or_else(|_| "pcast".to_string()),
        }
    }
}

/// Outcome of an optimistic document update.
enum Update {
    /// No document under the key
    Missing,
    /// The mutation declined to change anything
    Unchanged,
    /// The new document was written
    Written,
}

/// Registry stored in Redis.
pub struct RedisRegistry {
    client: redis::Client,
    prefix: String,
    cas: redis::Script,
}

impl RedisRegistry {
    /// Create a new registry.
    pub fn new(config: RegistryConfig) -> RegistryResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            prefix: config.key_prefix,
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> RegistryResult<Self> {
        Self::new(RegistryConfig::from_env())
    }

    fn story_key(&self, story_id: &StoryId) -> String {
        format!("{}:story:{}", self.prefix, story_id)
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    fn index_key(&self, story_id: &StoryId, kind: JobKind) -> String {
        format!("{}:story:{}:jobs:{}", self.prefix, story_id, kind)
    }

    fn response_key(&self, response_id: &str) -> String {
        format!("{}:response:{}", self.prefix, response_id)
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> RegistryResult<Option<T>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|r| serde_json::from_str(&r).map_err(RegistryError::from))
            .transpose()
    }

    /// Optimistic read-modify-write of one JSON document.
    ///
    /// `apply` returns `false` to leave the document untouched.
    async fn update_document<T, F>(&self, key: &str, mut apply: F) -> RegistryResult<Update>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) -> bool + Send,
    {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let raw: Option<String> = conn.get(key).await?;
            let Some(raw) = raw else {
                return Ok(Update::Missing);
            };

            let mut doc: T = serde_json::from_str(&raw)?;
            if !apply(&mut doc) {
                return Ok(Update::Unchanged);
            }
            let next = serde_json::to_string(&doc)?;

            let written: i64 = self
                .cas
                .key(key)
                .arg(&raw)
                .arg(&next)
                .invoke_async(&mut conn)
                .await?;

            match written {
                1 => return Ok(Update::Written),
                -1 => return Ok(Update::Missing),
                _ => {
                    counter!("pcast_registry_cas_conflicts_total").increment(1);
                    debug!(key = key, attempt = attempt, "Compare-and-set conflict, re-reading");
                }
            }
        }

        warn!(key = key, "Giving up after {} compare-and-set attempts", MAX_CAS_ATTEMPTS);
        Err(RegistryError::Conflict(key.to_string()))
    }
}

#[async_trait]
impl JobRegistry for RedisRegistry {
    async fn ping(&self) -> RegistryResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn create_story(&self, story: &Story) -> RegistryResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(story)?;
        let created: bool = conn.set_nx(self.story_key(&story.story_id), payload).await?;
        if !created {
            return Err(RegistryError::already_exists(story.story_id.to_string()));
        }
        Ok(())
    }

    async fn get_story(&self, story_id: &StoryId) -> RegistryResult<Option<Story>> {
        self.load(&self.story_key(story_id)).await
    }

    async fn update_story_status(&self, story_id: &StoryId, status: StoryStatus) -> RegistryResult<bool> {
        let update = self
            .update_document::<Story, _>(&self.story_key(story_id), |story| {
                story.advance(status).is_ok()
            })
            .await?;

        match update {
            Update::Written => Ok(true),
            Update::Unchanged => Ok(false),
            Update::Missing => Err(RegistryError::not_found(format!("story {}", story_id))),
        }
    }

    async fn advance_story_status(
        &self,
        story_id: &StoryId,
        from: StoryStatus,
        to: StoryStatus,
    ) -> RegistryResult<bool> {
        let update = self
            .update_document::<Story, _>(&self.story_key(story_id), |story| {
                story.status == from && story.advance(to).is_ok()
            })
            .await?;

        match update {
            Update::Written => Ok(true),
            Update::Unchanged => Ok(false),
            Update::Missing => Err(RegistryError::not_found(format!("story {}", story_id))),
        }
    }

    async fn set_narration(&self, story_id: &StoryId, narration: NarrationTrack) -> RegistryResult<()> {
        let update = self
            .update_document::<Story, _>(&self.story_key(story_id), |story| {
                story.narration = narration.clone();
                story.updated_at = chrono::Utc::now();
                true
            })
            .await?;

        match update {
            Update::Missing => Err(RegistryError::not_found(format!("story {}", story_id))),
            _ => Ok(()),
        }
    }

    async fn create_job(&self, job: &Job) -> RegistryResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        let created: bool = conn.set_nx(self.job_key(&job.job_id), payload).await?;
        if !created {
            return Err(RegistryError::already_exists(job.job_id.to_string()));
        }

        let _: () = conn
            .sadd(self.index_key(&job.story_id, job.kind()), job.job_id.as_str())
            .await?;
        if let Some(response_id) = &job.response_id {
            let _: () = conn
                .set(self.response_key(response_id), job.job_id.as_str())
                .await?;
        }
        counter!("pcast_registry_jobs_created_total", "kind" => job.kind().as_str()).increment(1);
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> RegistryResult<Option<Job>> {
        self.load(&self.job_key(job_id)).await
    }

    async fn find_by_response_id(&self, response_id: &str) -> RegistryResult<Option<Job>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let job_id: Option<String> = conn.get(self.response_key(response_id)).await?;
        match job_id {
            Some(id) => self.get_job(&JobId::from_string(id)).await,
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, story_id: &StoryId, kind: JobKind) -> RegistryResult<Vec<Job>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.smembers(self.index_key(story_id, kind)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.get(self.job_key(&JobId::from_string(id.as_str())));
        }
        let raws: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for (id, raw) in ids.iter().zip(raws) {
            match raw {
                Some(raw) => jobs.push(serde_json::from_str::<Job>(&raw)?),
                None => warn!(job_id = %id, story_id = %story_id, "Indexed job has no document"),
            }
        }
        Ok(jobs)
    }

    async fn count_by_status(
        &self,
        story_id: &StoryId,
        kind: JobKind,
        filter: &StatusFilter,
    ) -> RegistryResult<u64> {
        if *filter == StatusFilter::Any {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let total: u64 = conn.scard(self.index_key(story_id, kind)).await?;
            return Ok(total);
        }

        let jobs = self.list_jobs(story_id, kind).await?;
        Ok(jobs.iter().filter(|job| filter.matches(job.status)).count() as u64)
    }

    async fn mark_job_processing(&self, job_id: &JobId, response_id: Option<String>) -> RegistryResult<bool> {
        let update = self
            .update_document::<Job, _>(&self.job_key(job_id), |job| {
                job.mark_processing(response_id.clone())
            })
            .await?;

        match update {
            Update::Written => {
                if let Some(response_id) = &response_id {
                    let mut conn = self.client.get_multiplexed_async_connection().await?;
                    let _: () = conn.set(self.response_key(response_id), job_id.as_str()).await?;
                }
                Ok(true)
            }
            Update::Unchanged => Ok(false),
            Update::Missing => Err(RegistryError::not_found(format!("job {}", job_id))),
        }
    }

    async fn mark_job_terminal(&self, job_id: &JobId, outcome: &JobOutcome) -> RegistryResult<bool> {
        let update = self
            .update_document::<Job, _>(&self.job_key(job_id), |job| job.resolve(outcome))
            .await?;

        match update {
            Update::Written => {
                counter!("pcast_registry_jobs_resolved_total", "status" => outcome.status().as_str())
                    .increment(1);
                Ok(true)
            }
            Update::Unchanged => Ok(false),
            Update::Missing => Err(RegistryError::not_found(format!("job {}", job_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let registry = RedisRegistry::new(RegistryConfig {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "test".to_string(),
        })
        .unwrap();

        let story_id = StoryId::from("s-1");
        assert_eq!(registry.story_key(&story_id), "test:story:s-1");
        assert_eq!(
            registry.index_key(&story_id, JobKind::AudioSegment),
            "test:story:s-1:jobs:audio_segment"
        );
        assert_eq!(registry.response_key("r-9"), "test:response:r-9");
    }
}
