//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    create_story, evaluate_story, generation_webhook, get_story, get_story_progress, health, ready,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, create_rate_limiter, rate_limit_middleware, request_id, request_logging,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let rate_limiter = create_rate_limiter(state.config.rate_limit_rps);

    let story_routes = Router::new()
        .route("/stories", post(create_story))
        .route("/stories/:story_id", get(get_story))
        .route("/stories/:story_id/progress", get(get_story_progress))
        .route("/stories/:story_id/evaluate", post(evaluate_story))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    // Vendors retry on 429, so callbacks are never rate limited here.
    let webhook_routes = Router::new().route("/webhooks/generation", post(generation_webhook));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", story_routes)
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
