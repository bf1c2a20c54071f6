use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Map};
use tokio::time::sleep;
use tracing::debug;

use crate::{
    backend::{BackendError, FragmentStream, GenerationBackend},
    models::{GenerationRequest, ModelSummary},
};

#[derive(Debug, Clone)]
pub enum MockStep {
    Fragment(Bytes),
    Delay(Duration),
    Fail(String),
    /// Never yields again; the stream stays open until dropped.
    Hang,
}

/// In-process backend that echoes the prompt, or replays a fixed fragment script.
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    token_delay: Duration,
    script: Option<Vec<MockStep>>,
    reply_body: Option<Bytes>,
    connect_error: Option<String>,
    models: Vec<ModelSummary>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            name: "mock-backend".to_owned(),
            token_delay: Duration::from_millis(35),
            script: None,
            reply_body: None,
            connect_error: None,
            models: vec![
                ModelSummary {
                    name: "mock-small".to_owned(),
                    details: Map::new(),
                },
                ModelSummary {
                    name: "mock-large".to_owned(),
                    details: Map::new(),
                },
            ],
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockBackend {
    pub fn scripted(steps: Vec<MockStep>) -> Self {
        Self {
            script: Some(steps),
            ..Self::default()
        }
    }

    /// Script made of raw fragments delivered back to back.
    pub fn fragments(fragments: &[&str]) -> Self {
        Self::scripted(
            fragments
                .iter()
                .map(|fragment| MockStep::Fragment(Bytes::copy_from_slice(fragment.as_bytes())))
                .collect(),
        )
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            connect_error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_reply_body(mut self, body: impl Into<Bytes>) -> Self {
        self.reply_body = Some(body.into());
        self
    }

    pub fn opened_streams(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released_streams(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn steps_for(&self, request: &GenerationRequest) -> Vec<MockStep> {
        if let Some(script) = &self.script {
            return script.clone();
        }

        let mut steps = Vec::new();
        for token in split_for_stream(&render_response(request)) {
            let line = json!({"model": request.model, "response": token, "done": false});
            steps.push(MockStep::Fragment(Bytes::from(format!("{line}\n"))));
            if !self.token_delay.is_zero() {
                steps.push(MockStep::Delay(self.token_delay));
            }
        }
        let last = json!({"model": request.model, "response": "", "done": true});
        steps.push(MockStep::Fragment(Bytes::from(format!("{last}\n"))));
        steps
    }

    fn check_connect(&self) -> Result<(), BackendError> {
        match &self.connect_error {
            Some(message) => Err(BackendError::Unreachable(message.clone())),
            None => Ok(()),
        }
    }
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        "mock://local"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Bytes, BackendError> {
        self.check_connect()?;
        if let Some(body) = &self.reply_body {
            return Ok(body.clone());
        }

        let body = json!({
            "model": request.model,
            "response": render_response(request),
            "done": true,
        });
        Ok(Bytes::from(body.to_string()))
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, BackendError> {
        self.check_connect()?;
        let steps = self.steps_for(request);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = ReleaseGuard(self.released.clone());

        let stream = async_stream::stream! {
            let _release = guard;
            for step in steps {
                match step {
                    MockStep::Fragment(bytes) => yield Ok(bytes),
                    MockStep::Delay(delay) => sleep(delay).await,
                    MockStep::Fail(message) => {
                        yield Err(BackendError::Transport(message));
                        break;
                    }
                    MockStep::Hang => std::future::pending::<()>().await,
                }
            }
        };

        debug!(backend = %self.name, "stream prepared");
        Ok(stream.boxed())
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, BackendError> {
        self.check_connect()?;
        Ok(self.models.clone())
    }

    async fn health_check(&self) -> bool {
        self.connect_error.is_none()
    }
}

fn render_response(request: &GenerationRequest) -> String {
    format!("Mock response for model {}: {}", request.model, request.prompt)
}

fn split_for_stream(text: &str) -> Vec<String> {
    let tokens: Vec<String> = text.split_whitespace().map(ToString::to_string).collect();
    let len = tokens.len();

    tokens
        .into_iter()
        .enumerate()
        .map(|(index, token)| {
            if index + 1 == len {
                token
            } else {
                format!("{token} ")
            }
        })
        .collect()
}
