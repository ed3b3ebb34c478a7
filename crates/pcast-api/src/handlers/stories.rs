//! Story intake and progress handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use pcast_models::{Story, StoryEvent, StoryId, StoryProgress, StoryStatus};
use pcast_worker::{CompletionCheck, StoryPlan};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Request to start generating a story from its parsed script.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoryRequest {
    /// Caller-chosen ID; generated when absent
    #[serde(default)]
    pub story_id: Option<String>,
    pub user_id: String,
    pub prompt: String,
    pub target_duration_secs: u32,
    #[serde(default = "default_video_enabled")]
    pub video_enabled: bool,
    pub plan: StoryPlan,
}

fn default_video_enabled() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoryResponse {
    pub story_id: StoryId,
    pub status: StoryStatus,
}

/// Record a story and dispatch its jobs in the background.
///
/// The plan is validated and the story written before responding, so a bad
/// plan or a duplicate ID is reported to the caller. Dispatch can take as
/// long as the slowest anchor, so it runs after the response.
pub async fn create_story(
    State(state): State<AppState>,
    Json(request): Json<CreateStoryRequest>,
) -> ApiResult<(StatusCode, Json<CreateStoryResponse>)> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId must not be empty"));
    }
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    if request.target_duration_secs == 0 {
        return Err(ApiError::bad_request("targetDurationSecs must be positive"));
    }
    request.plan.validate()?;

    let story_id = request
        .story_id
        .filter(|id| !id.trim().is_empty())
        .map(StoryId::from_string)
        .unwrap_or_default();
    let mut story = Story::new(
        story_id.clone(),
        request.user_id,
        request.prompt,
        request.target_duration_secs,
    );
    if !request.video_enabled {
        story = story.audio_only();
    }

    state.pipeline.registry.create_story(&story).await?;
    metrics::record_story_created(story.video_enabled);
    info!(
        story_id = %story_id,
        user_id = %story.user_id,
        scenes = request.plan.scenes.len(),
        "Story accepted"
    );

    let pipeline = state.pipeline.clone();
    let plan = request.plan;
    let background_id = story_id.clone();
    tokio::spawn(async move {
        let story_id = background_id;
        if let Err(e) = pipeline.dispatcher.dispatch_plan(&story_id, &plan).await {
            error!(story_id = %story_id, "Story dispatch failed: {}", e);
            match pipeline
                .registry
                .update_story_status(&story_id, StoryStatus::ScriptFailed)
                .await
            {
                Ok(true) => {
                    let event = StoryEvent::error(story_id.clone(), format!("dispatch failed: {}", e));
                    if let Err(e) = pipeline.events.publish(&event).await {
                        warn!(story_id = %story_id, "Failed to publish error event: {}", e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(story_id = %story_id, "Failed to mark story failed: {}", e),
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateStoryResponse {
            story_id,
            status: story.status,
        }),
    ))
}

/// Get a story record.
pub async fn get_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<Story>> {
    let story_id = StoryId::from_string(story_id);
    let story = state
        .pipeline
        .registry
        .get_story(&story_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("story {}", story_id)))?;
    Ok(Json(story))
}

/// Get live job counts for a story.
pub async fn get_story_progress(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<StoryProgress>> {
    let story_id = StoryId::from_string(story_id);
    let progress = state
        .pipeline
        .evaluator
        .progress(&story_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("story {}", story_id)))?;
    Ok(Json(progress))
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub result: &'static str,
    pub ready: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
}

/// Run a completion check now, e.g. for a story that looks stuck.
pub async fn evaluate_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<EvaluateResponse>> {
    let story_id = StoryId::from_string(story_id);
    let check = state.pipeline.evaluator.check_story_completion(&story_id).await;

    let blockers = match &check {
        CompletionCheck::StoryMissing => {
            return Err(ApiError::not_found(format!("story {}", story_id)));
        }
        CompletionCheck::Failed(reason) => return Err(ApiError::internal(reason.clone())),
        CompletionCheck::NotReady(blockers) => blockers.iter().map(|b| b.to_string()).collect(),
        _ => Vec::new(),
    };

    Ok(Json(EvaluateResponse {
        result: check.label(),
        ready: check.is_ready(),
        blockers,
    }))
}
