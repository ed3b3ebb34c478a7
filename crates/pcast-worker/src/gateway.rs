//! HTTP client for the generation gateway.
//!
//! The gateway fronts the voice, image and music vendors behind one JSON
//! endpoint. It either accepts a request and calls back later, or answers
//! synchronously with the finished media.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pcast_models::JobOutcome;

use crate::dispatch::{Dispatched, GenerationDispatcher, GenerationRequest};
use crate::error::{WorkerError, WorkerResult};

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL, e.g. `https://gateway.internal`
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Where the gateway should POST completion webhooks
    pub callback_url: Option<String>,
}

impl GatewayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let base_url = std::env::var("GENERATION_GATEWAY_URL")
            .map_err(|_| WorkerError::config_error("GENERATION_GATEWAY_URL not set"))?;

        Ok(Self {
            base_url,
            api_key: std::env::var("GENERATION_GATEWAY_API_KEY").ok(),
            timeout: Duration::from_secs(
                std::env::var("GENERATION_GATEWAY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            callback_url: std::env::var("GENERATION_CALLBACK_URL").ok(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a> {
    #[serde(flatten)]
    request: &'a GenerationRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum GatewayResponse {
    #[serde(rename_all = "camelCase")]
    Accepted { response_id: String },
    #[serde(rename_all = "camelCase")]
    Completed {
        media_url: String,
        #[serde(default)]
        duration_secs: Option<f64>,
    },
    Failed {
        #[serde(default)]
        error: Option<String>,
    },
}

impl From<GatewayResponse> for Dispatched {
    fn from(response: GatewayResponse) -> Self {
        match response {
            GatewayResponse::Accepted { response_id } => Dispatched::Accepted { response_id },
            GatewayResponse::Completed {
                media_url,
                duration_secs,
            } => Dispatched::Finished(JobOutcome::Completed {
                media_url,
                duration_secs,
            }),
            GatewayResponse::Failed { error } => Dispatched::Finished(JobOutcome::failed(
                error.unwrap_or_else(|| "generation failed".to_string()),
            )),
        }
    }
}

/// Generation dispatcher backed by the HTTP gateway.
pub struct HttpDispatcher {
    client: Client,
    config: GatewayConfig,
}

impl HttpDispatcher {
    pub fn new(config: GatewayConfig) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WorkerError::config_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/generate", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationDispatcher for HttpDispatcher {
    async fn request(&self, request: &GenerationRequest) -> WorkerResult<Dispatched> {
        let body = GatewayRequest {
            request,
            callback_url: self.config.callback_url.as_deref(),
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            WorkerError::dispatch_failed(format!("Gateway request for job {} failed: {}", request.job_id, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Gateway returned {}: {}", status, error_text);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                WorkerError::dispatch_failed(message)
            } else {
                WorkerError::rejected(message)
            });
        }

        let parsed: GatewayResponse = response.json().await.map_err(|e| {
            WorkerError::rejected(format!("Failed to parse gateway response: {}", e))
        })?;

        debug!(job_id = %request.job_id, kind = %request.kind(), "Gateway answered");
        Ok(parsed.into())
    }
}
