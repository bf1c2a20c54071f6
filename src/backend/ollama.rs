use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{
    backend::{BackendError, FragmentStream, GenerationBackend},
    config::GatewayConfig,
    models::{GenerationRequest, ModelSummary},
};

/// Client for an Ollama-compatible model server.
#[derive(Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl OllamaBackend {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, String> {
        // No client-wide timeout: streaming reads must be allowed to run indefinitely.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|error| format!("failed to build backend HTTP client: {error}"))?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_owned(),
            handshake_timeout: config.handshake_timeout,
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_generate(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let mut builder = self
            .client
            .post(self.url("/api/generate"))
            .json(&request.backend_payload(stream));
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = tokio::time::timeout(self.handshake_timeout, builder.send())
            .await
            .map_err(|_| {
                BackendError::Timeout(format!(
                    "no response headers within {}s",
                    self.handshake_timeout.as_secs()
                ))
            })?
            .map_err(map_send_error)?;

        ensure_success(response).await
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Bytes, BackendError> {
        let response = self.post_generate(request, false).await?;
        response.bytes().await.map_err(|error| {
            if error.is_timeout() {
                BackendError::Timeout(error.to_string())
            } else {
                BackendError::Transport(error.to_string())
            }
        })
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, BackendError> {
        let response = self.post_generate(request, true).await?;
        debug!(
            backend = self.name(),
            request_id = %request.request_id,
            "stream opened"
        );

        Ok(response
            .bytes_stream()
            .map(|next| next.map_err(|error| BackendError::Transport(error.to_string())))
            .boxed())
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, BackendError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = ensure_success(response).await?;

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;
        Ok(parsed.models)
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.url("/"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown backend error".to_owned());
    Err(map_http_error(status, body))
}

fn map_send_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(error.to_string())
    } else {
        BackendError::Unreachable(error.to_string())
    }
}

fn map_http_error(status: StatusCode, body: String) -> BackendError {
    let trimmed = body.chars().take(400).collect::<String>();
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Timeout(format!("upstream timeout: {trimmed}"))
        }
        _ => BackendError::Status {
            status: status.as_u16(),
            body: trimmed,
        },
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelSummary>,
}
