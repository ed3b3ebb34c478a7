//! Router tests against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pcast_api::{create_router, ApiConfig, AppState};
use pcast_events::MemoryEventSink;
use pcast_models::{JobKind, StoryId};
use pcast_registry::{JobRegistry, MemoryRegistry};
use pcast_storage::MemoryBlobStore;
use pcast_worker::narration::{AudioInput, EncodedAudio};
use pcast_worker::{
    Collaborators, Dispatched, GenerationDispatcher, GenerationRequest, MediaEncoder, StoryContext,
    WorkerConfig, WorkerResult,
};

/// Accepts every request and never calls back on its own.
struct AcceptingGateway;

#[async_trait]
impl GenerationDispatcher for AcceptingGateway {
    async fn request(&self, request: &GenerationRequest) -> WorkerResult<Dispatched> {
        Ok(Dispatched::Accepted {
            response_id: format!("resp-{}", request.job_id),
        })
    }
}

struct SilentEncoder;

#[async_trait]
impl MediaEncoder for SilentEncoder {
    async fn concat_audio(&self, segments: &[AudioInput]) -> WorkerResult<EncodedAudio> {
        Ok(EncodedAudio {
            bytes: Vec::new(),
            duration_secs: segments.iter().filter_map(|s| s.duration_secs).sum(),
        })
    }
}

fn test_app(config: ApiConfig) -> (Router, Arc<MemoryRegistry>) {
    let registry = Arc::new(MemoryRegistry::new());
    let blob = Arc::new(MemoryBlobStore::default());

    let pipeline = StoryContext::new(
        WorkerConfig {
            poll_interval: Duration::from_secs(600),
            rehost_media: false,
            ..Default::default()
        },
        Collaborators {
            registry: registry.clone(),
            events: Arc::new(MemoryEventSink::new()),
            blob: blob.clone(),
            generator: Arc::new(AcceptingGateway),
            encoder: Arc::new(SilentEncoder),
            trigger: None,
            status_source: None,
            http: None,
        },
    )
    .unwrap();

    let state = AppState::from_parts(config, Arc::new(pipeline), blob);
    (create_router(state, None), registry)
}

fn story_body(story_id: &str) -> Value {
    json!({
        "storyId": story_id,
        "userId": "user-1",
        "prompt": "the last lighthouse keeper",
        "targetDurationSecs": 60,
        "plan": {
            "scenes": [
                {
                    "sceneId": 1,
                    "sceneNumber": 1,
                    "narration": "The lamp had burned for a hundred years.",
                    "shots": [
                        { "prompt": "lighthouse at dusk", "durationSecs": 4.0 },
                        { "prompt": "keeper climbing stairs", "durationSecs": 4.0 }
                    ]
                }
            ],
            "musicPrompt": "slow strings"
        }
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_and_ready() {
    let (app, _) = test_app(ApiConfig::default());

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["registry"]["status"], "ok");
}

#[tokio::test]
async fn test_create_story_then_read_progress() {
    let (app, registry) = test_app(ApiConfig::default());

    let response = app
        .clone()
        .oneshot(post_json("/api/stories", &story_body("story-a")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["storyId"], "story-a");
    assert_eq!(body["status"], "pending");

    // Dispatch runs in the background.
    let story_id = StoryId::from("story-a");
    for _ in 0..100 {
        if registry.image_counts(&story_id).await.unwrap().total == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let response = app
        .clone()
        .oneshot(get("/api/stories/story-a/progress"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let progress = body_json(response).await;
    assert_eq!(progress["images"]["total"], 2);
    assert_eq!(progress["audio_segments_total"], 1);

    let response = app.oneshot(get("/api/stories/story-a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user_id"], "user-1");
}

#[tokio::test]
async fn test_invalid_and_duplicate_stories_are_rejected() {
    let (app, _) = test_app(ApiConfig::default());

    let mut empty = story_body("story-b");
    empty["plan"]["scenes"] = json!([]);
    let response = app.clone().oneshot(post_json("/api/stories", &empty)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["detail"].as_str().unwrap().contains("plan"));

    let response = app
        .clone()
        .oneshot(post_json("/api/stories", &story_body("story-b")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .oneshot(post_json("/api/stories", &story_body("story-b")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_story_is_not_found() {
    let (app, _) = test_app(ApiConfig::default());

    let response = app
        .clone()
        .oneshot(get("/api/stories/missing/progress"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post_json("/api/stories/missing/evaluate", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_for_unknown_response_is_acknowledged() {
    let (app, _) = test_app(ApiConfig::default());

    let response = app
        .oneshot(post_json(
            "/webhooks/generation",
            &json!({ "responseId": "nobody", "status": "completed", "mediaUrl": "https://v/x.png" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["result"], "unknown");
}

#[tokio::test]
async fn test_webhook_token_is_enforced() {
    let (app, _) = test_app(ApiConfig {
        webhook_token: Some("s3cret".to_string()),
        ..Default::default()
    });
    let payload = json!({ "responseId": "r-1", "status": "failed", "error": "quota" });

    let response = app
        .clone()
        .oneshot(post_json("/webhooks/generation", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = post_json("/webhooks/generation", &payload);
    request
        .headers_mut()
        .insert("X-Webhook-Token", "s3cres".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = post_json("/webhooks/generation", &payload);
    request
        .headers_mut()
        .insert("X-Webhook-Token", "s3cret".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_webhooks_drive_story_to_ready() {
    let (app, registry) = test_app(ApiConfig::default());
    let story_id = StoryId::from("story-c");

    let response = app
        .clone()
        .oneshot(post_json("/api/stories", &story_body("story-c")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Wait until every job has been accepted by the gateway.
    let mut response_ids = Vec::new();
    for _ in 0..100 {
        response_ids.clear();
        for kind in [JobKind::AudioSegment, JobKind::Image, JobKind::Music] {
            for job in registry.list_jobs(&story_id, kind).await.unwrap() {
                if let Some(id) = job.response_id {
                    response_ids.push(id);
                }
            }
        }
        if response_ids.len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(response_ids.len(), 4);

    let response = app
        .clone()
        .oneshot(post_json("/api/stories/story-c/evaluate", &json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"], "not_ready");
    assert!(!body["blockers"].as_array().unwrap().is_empty());

    let mut last = Value::Null;
    for response_id in &response_ids {
        let response = app
            .clone()
            .oneshot(post_json(
                "/webhooks/generation",
                &json!({
                    "responseId": response_id,
                    "status": "completed",
                    "mediaUrl": format!("https://vendor.test/{}", response_id),
                    "durationSecs": 20.0
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        last = body_json(response).await;
        assert_eq!(last["result"], "applied");
    }
    assert_eq!(last["completion"], "ready");

    // Redelivery is acknowledged without effect.
    let response = app
        .oneshot(post_json(
            "/webhooks/generation",
            &json!({ "responseId": response_ids[0], "status": "failed" }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["result"], "duplicate");
}
