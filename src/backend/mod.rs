pub mod mock;
pub mod ollama;

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::models::{GenerationRequest, ModelSummary};

/// Raw response-body fragments, exactly as the transport delivered them.
pub type FragmentStream = BoxStream<'static, Result<Bytes, BackendError>>;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Base address reported by health endpoints.
    fn base_url(&self) -> &str;

    /// Single-shot generation. Returns the undecoded response body.
    async fn generate(&self, request: &GenerationRequest) -> Result<Bytes, BackendError>;

    /// Opens a streaming generation. Dropping the returned stream releases the connection.
    async fn open_stream(&self, request: &GenerationRequest)
        -> Result<FragmentStream, BackendError>;

    async fn list_models(&self) -> Result<Vec<ModelSummary>, BackendError>;

    async fn health_check(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend stream failed: {0}")]
    Transport(String),
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn stage(&self) -> &'static str {
        match self {
            BackendError::Unreachable(_) => "connect",
            BackendError::Timeout(_) => "timeout",
            BackendError::Status { .. } => "status",
            BackendError::Transport(_) => "read",
            BackendError::InvalidResponse(_) => "decode",
        }
    }
}
