//! Generation vendor callbacks.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use pcast_models::GenerationOutcome;
use pcast_worker::Resolution;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<&'static str>,
}

/// Constant-time token comparison over fixed-length MACs of both tokens.
fn token_matches(expected: &str, provided: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;
    const CONTEXT: &[u8] = b"pcast-webhook-token";

    let tag = |key: &str| {
        HmacSha256::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(CONTEXT);
            mac
        })
    };

    let (Ok(expected_mac), Ok(provided_mac)) = (tag(expected), tag(provided)) else {
        return false;
    };
    provided_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}

/// Record a vendor's final result for a job.
///
/// Unknown correlation IDs and repeats are acknowledged with 202 so vendors
/// stop retrying; only a failure to record the outcome returns an error.
pub async fn generation_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<GenerationOutcome>,
) -> ApiResult<(StatusCode, Json<WebhookResponse>)> {
    if let Some(expected) = &state.config.webhook_token {
        let provided = headers.get("X-Webhook-Token").and_then(|v| v.to_str().ok());
        if !provided.is_some_and(|token| token_matches(expected, token)) {
            return Err(ApiError::unauthorized("invalid webhook token"));
        }
    }

    debug!(response_id = %report.response_id, status = ?report.status, "Generation webhook");
    let resolution = state.pipeline.handler.handle_outcome(report).await?;

    let response = match &resolution {
        Resolution::UnknownResponse => WebhookResponse {
            result: "unknown",
            completion: None,
        },
        Resolution::Duplicate => WebhookResponse {
            result: "duplicate",
            completion: None,
        },
        Resolution::Applied { check, .. } => WebhookResponse {
            result: "applied",
            completion: Some(check.label()),
        },
    };
    metrics::record_webhook(response.result);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("s3cret-token", "s3cret-token"));
        assert!(!token_matches("s3cret-token", "s3cret-tokem"));
        assert!(!token_matches("s3cret-token", "s3cret"));
        assert!(!token_matches("s3cret-token", ""));
    }
}
