//! Generation job records.
//!
//! Every independently completing unit of work (script, per-scene audio
//! segment, per-shot image, anchor reference image, background music) is a
//! [`Job`] keyed by its owning story. Status strings are shared with other
//! processes and must not change.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::story::StoryId;

/// Appearances at which an entity needs a consistency reference image.
pub const ANCHOR_MIN_APPEARANCES: u32 = 2;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-entity job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Anchor entity appears once, no reference image required
    NotNeeded,
    /// Created, request not yet accepted by the vendor
    #[default]
    Pending,
    /// Request accepted, waiting for the vendor
    Processing,
    /// Vendor reports generation underway
    Generating,
    /// Finished with a media reference
    Completed,
    /// Finished without output (error, rejection or timeout)
    Failed,
}

impl JobStatus {
    /// Statuses that are still in flight.
    pub const IN_FLIGHT: [JobStatus; 3] =
        [JobStatus::Pending, JobStatus::Processing, JobStatus::Generating];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotNeeded => "not_needed",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check if the job is still waiting on an external service.
    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    /// Check if nothing else will happen to this job.
    pub fn is_resolved(&self) -> bool {
        self.is_terminal() || *self == JobStatus::NotNeeded
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_needed" => Ok(JobStatus::NotNeeded),
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "generating" => Ok(JobStatus::Generating),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Status filter for registry counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    /// Every job of the kind
    Any,
    /// Jobs whose status is one of the listed values
    Only(Vec<JobStatus>),
}

impl StatusFilter {
    pub fn one(status: JobStatus) -> Self {
        Self::Only(vec![status])
    }

    pub fn in_flight() -> Self {
        Self::Only(JobStatus::IN_FLIGHT.to_vec())
    }

    pub fn matches(&self, status: JobStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Only(statuses) => statuses.contains(&status),
        }
    }
}

/// Kind of generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Script,
    AudioSegment,
    Image,
    Anchor,
    Music,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Script,
        JobKind::AudioSegment,
        JobKind::Image,
        JobKind::Anchor,
        JobKind::Music,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Script => "script",
            JobKind::AudioSegment => "audio_segment",
            JobKind::Image => "image",
            JobKind::Anchor => "anchor",
            JobKind::Music => "music",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recurring entity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnchorType {
    Character,
    Setting,
}

impl AnchorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorType::Character => "character",
            AnchorType::Setting => "setting",
        }
    }
}

/// Kind-specific job attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobDetails {
    /// Story script
    Script,
    /// Narration for one scene
    AudioSegment { scene_id: u32, scene_number: u32 },
    /// One shot within a scene
    Image {
        scene_id: u32,
        shot_index: u32,
        target_duration_secs: f64,
    },
    /// Consistency reference image for a recurring entity
    Anchor {
        entity_id: String,
        anchor_type: AnchorType,
        name: String,
        description: String,
        appearances: u32,
    },
    /// Background music bed
    Music,
}

impl JobDetails {
    pub fn kind(&self) -> JobKind {
        match self {
            JobDetails::Script => JobKind::Script,
            JobDetails::AudioSegment { .. } => JobKind::AudioSegment,
            JobDetails::Image { .. } => JobKind::Image,
            JobDetails::Anchor { .. } => JobKind::Anchor,
            JobDetails::Music => JobKind::Music,
        }
    }

    /// Scene the job belongs to, if any.
    pub fn scene_id(&self) -> Option<u32> {
        match self {
            JobDetails::AudioSegment { scene_id, .. } | JobDetails::Image { scene_id, .. } => {
                Some(*scene_id)
            }
            _ => None,
        }
    }
}

/// Result of an external generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        media_url: String,
        duration_secs: Option<f64>,
    },
    Failed {
        reason: String,
    },
}

impl JobOutcome {
    pub fn completed(media_url: impl Into<String>) -> Self {
        Self::Completed {
            media_url: media_url.into(),
            duration_secs: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A tracked unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub job_id: JobId,

    /// Owning story
    pub story_id: StoryId,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Kind-specific attributes
    pub details: JobDetails,

    /// Correlation ID returned by the vendor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,

    /// Blob store URL of the result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    /// Measured media duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Terminal timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job.
    pub fn new(story_id: StoryId, details: JobDetails) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            story_id,
            status: JobStatus::Pending,
            details,
            response_id: None,
            media_url: None,
            duration_secs: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn script(story_id: StoryId) -> Self {
        Self::new(story_id, JobDetails::Script)
    }

    pub fn audio_segment(story_id: StoryId, scene_id: u32, scene_number: u32) -> Self {
        Self::new(
            story_id,
            JobDetails::AudioSegment {
                scene_id,
                scene_number,
            },
        )
    }

    pub fn image(story_id: StoryId, scene_id: u32, shot_index: u32, target_duration_secs: f64) -> Self {
        Self::new(
            story_id,
            JobDetails::Image {
                scene_id,
                shot_index,
                target_duration_secs,
            },
        )
    }

    /// Create an anchor job. Entities seen fewer than
    /// [`ANCHOR_MIN_APPEARANCES`] times start as `not_needed`.
    pub fn anchor(
        story_id: StoryId,
        entity_id: impl Into<String>,
        anchor_type: AnchorType,
        name: impl Into<String>,
        description: impl Into<String>,
        appearances: u32,
    ) -> Self {
        let mut job = Self::new(
            story_id,
            JobDetails::Anchor {
                entity_id: entity_id.into(),
                anchor_type,
                name: name.into(),
                description: description.into(),
                appearances,
            },
        );
        if appearances < ANCHOR_MIN_APPEARANCES {
            job.status = JobStatus::NotNeeded;
        }
        job
    }

    pub fn music(story_id: StoryId) -> Self {
        Self::new(story_id, JobDetails::Music)
    }

    pub fn kind(&self) -> JobKind {
        self.details.kind()
    }

    /// Record the vendor correlation ID. Ignored once terminal.
    pub fn mark_processing(&mut self, response_id: Option<String>) -> bool {
        if self.status.is_resolved() {
            return false;
        }
        self.status = JobStatus::Processing;
        if response_id.is_some() {
            self.response_id = response_id;
        }
        self.updated_at = Utc::now();
        true
    }

    /// Apply a terminal outcome. Only the first terminal mutation sticks.
    pub fn resolve(&mut self, outcome: &JobOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        match outcome {
            JobOutcome::Completed {
                media_url,
                duration_secs,
            } => {
                self.status = JobStatus::Completed;
                self.media_url = Some(media_url.clone());
                self.duration_secs = *duration_secs;
            }
            JobOutcome::Failed { reason } => {
                self.status = JobStatus::Failed;
                self.error_message = Some(reason.clone());
            }
        }
        self.updated_at = now;
        self.resolved_at = Some(now);
        true
    }
}

/// Status reported by an external generation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Normalised webhook payload from a generation vendor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    /// Vendor correlation ID
    pub response_id: String,
    /// Our job ID, echoed back from the generation request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Final status
    pub status: OutcomeStatus,
    /// Where the result can be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Measured duration, when the vendor reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Vendor error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationOutcome {
    /// Convert into a registry outcome. A "completed" report without a
    /// media reference is treated as a failure.
    pub fn into_outcome(self) -> JobOutcome {
        match (self.status, self.media_url) {
            (OutcomeStatus::Completed, Some(url)) => JobOutcome::Completed {
                media_url: url,
                duration_secs: self.duration_secs,
            },
            (OutcomeStatus::Completed, None) => {
                JobOutcome::failed("vendor reported completion without media")
            }
            (OutcomeStatus::Failed, _) => JobOutcome::failed(
                self.error.unwrap_or_else(|| "generation failed".to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        for status in JobStatus::IN_FLIGHT {
            assert!(!status.is_terminal());
            assert!(status.is_in_flight());
        }
        assert!(!JobStatus::NotNeeded.is_terminal());
        assert!(JobStatus::NotNeeded.is_resolved());
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&JobStatus::NotNeeded).unwrap(), "\"not_needed\"");
        assert_eq!("generating".parse::<JobStatus>().unwrap(), JobStatus::Generating);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_anchor_needs_two_appearances() {
        let story = StoryId::new();
        let once = Job::anchor(story.clone(), "char-1", AnchorType::Character, "Ada", "", 1);
        assert_eq!(once.status, JobStatus::NotNeeded);

        let twice = Job::anchor(story, "char-2", AnchorType::Character, "Bo", "", 2);
        assert_eq!(twice.status, JobStatus::Pending);
        assert_eq!(twice.kind(), JobKind::Anchor);
    }

    #[test]
    fn test_resolve_is_first_write_wins() {
        let mut job = Job::image(StoryId::new(), 1, 0, 4.0);
        assert!(job.mark_processing(Some("resp-1".into())));
        assert!(job.resolve(&JobOutcome::completed("https://cdn/img.png")));
        assert!(!job.resolve(&JobOutcome::failed("late failure")));

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
        assert!(!job.mark_processing(None));
    }

    #[test]
    fn test_details_tagging() {
        let job = Job::audio_segment(StoryId::from("s-1"), 3, 2);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["details"]["kind"], "audio_segment");
        assert_eq!(json["details"]["scene_id"], 3);
        assert_eq!(job.details.scene_id(), Some(3));
    }

    #[test]
    fn test_outcome_without_media_fails() {
        let report: GenerationOutcome =
            serde_json::from_str(r#"{"responseId":"r-1","status":"completed"}"#).unwrap();
        assert_eq!(report.into_outcome().status(), JobStatus::Failed);

        let report: GenerationOutcome = serde_json::from_str(
            r#"{"responseId":"r-2","status":"completed","mediaUrl":"https://cdn/a.png"}"#,
        )
        .unwrap();
        assert_eq!(report.job_id, None);
        assert_eq!(report.into_outcome(), JobOutcome::completed("https://cdn/a.png"));

        let report: GenerationOutcome = serde_json::from_str(
            r#"{"responseId":"r-3","jobId":"job-9","status":"failed","error":"quota"}"#,
        )
        .unwrap();
        assert_eq!(report.job_id, Some(JobId::from_string("job-9")));
        assert_eq!(report.into_outcome(), JobOutcome::failed("quota"));
    }

    #[test]
    fn test_status_filter() {
        let filter = StatusFilter::in_flight();
        assert!(filter.matches(JobStatus::Generating));
        assert!(!filter.matches(JobStatus::Failed));
        assert!(StatusFilter::Any.matches(JobStatus::NotNeeded));
    }
}
