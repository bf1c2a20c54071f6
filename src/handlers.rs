use std::{convert::Infallible, time::Instant};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    errors::AppError,
    models::{ChatBody, ChatReply, Envelope, GenerateBody, GenerateData, GenerationRequest},
    relay::SseSink,
    state::AppState,
};

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "LLM stream gateway is running",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn backend_health(State(state): State<AppState>) -> Response {
    let backend_url = state.backend.base_url().to_owned();
    if state.backend.health_check().await {
        Json(json!({
            "success": true,
            "message": "Connected to model backend",
            "ollamaUrl": backend_url,
        }))
        .into_response()
    } else {
        warn!(backend = %state.backend.name(), %backend_url, "backend health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "Cannot connect to model backend",
                "ollamaUrl": backend_url,
            })),
        )
            .into_response()
    }
}

pub async fn list_models(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let result = async {
        let models = state.backend.list_models().await?;
        let count = models.len();
        Ok::<Response, AppError>(Json(Envelope::counted(models, count)).into_response())
    }
    .await;
    finish(&state, "/api/llm/models", "GET", started, result)
}

pub async fn model_info(State(state): State<AppState>, Path(model): Path<String>) -> Response {
    let started = Instant::now();
    let result = async {
        let models = state.backend.list_models().await?;
        let found = models
            .into_iter()
            .find(|candidate| candidate.name == model)
            .ok_or_else(|| AppError::NotFound(format!("Model '{model}' not found")))?;
        Ok::<Response, AppError>(Json(Envelope::ok(found)).into_response())
    }
    .await;
    finish(&state, "/api/llm/models/:model", "GET", started, result)
}

pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();
    let result = async {
        let Json(body) = payload?;
        let request = body
            .into_request(&state.config)
            .map_err(AppError::BadRequest)?;
        log_accepted(&request, false);

        let completion = state.relay.complete(&request).await?;
        let data = GenerateData {
            text: completion.text,
            model: completion.model.unwrap_or(request.model),
        };
        Ok::<Response, AppError>(Json(Envelope::ok(data)).into_response())
    }
    .await;
    finish(&state, "/api/llm/generate", "POST", started, result)
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();
    let result = async {
        let Json(body) = payload?;
        let request = body
            .into_request(&state.config)
            .map_err(AppError::BadRequest)?;
        log_accepted(&request, false);

        let completion = state.relay.complete(&request).await?;
        let reply = ChatReply {
            role: "assistant",
            content: completion.text,
            model: completion.model.unwrap_or(request.model),
        };
        Ok::<Response, AppError>(Json(Envelope::ok(reply)).into_response())
    }
    .await;
    finish(&state, "/api/llm/chat", "POST", started, result)
}

pub async fn stream(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();
    let result = payload
        .map_err(AppError::from)
        .and_then(|Json(body)| body.into_request(&state.config).map_err(AppError::BadRequest))
        .map(|request| start_relay(&state, request));
    finish(&state, "/api/llm/stream", "POST", started, result)
}

fn start_relay(state: &AppState, request: GenerationRequest) -> Response {
    log_accepted(&request, true);

    let (mut sink, events) = SseSink::channel(state.config.sink_capacity);
    let relay = state.relay.clone();
    let active = state.metrics.stream_guard();
    tokio::spawn(async move {
        let _active = active;
        relay.run(request, &mut sink).await;
    });

    Sse::new(events.map(Ok::<Event, Infallible>))
        .keep_alive(KeepAlive::new().interval(state.config.keep_alive))
        .into_response()
}

fn log_accepted(request: &GenerationRequest, stream: bool) {
    info!(
        request_id = %request.request_id,
        model = %request.model,
        stream,
        prompt_chars = request.prompt.chars().count(),
        temperature = request.options.temperature,
        max_tokens = request.options.max_tokens,
        "generation request accepted"
    );
}

fn finish(
    state: &AppState,
    path: &str,
    method: &str,
    started: Instant,
    result: Result<Response, AppError>,
) -> Response {
    let response = match result {
        Ok(response) => response,
        Err(error) => {
            if !matches!(error, AppError::BadRequest(_) | AppError::NotFound(_)) {
                warn!(path, error = %error, "request failed");
            }
            error.into_response()
        }
    };

    state
        .metrics
        .observe_request(path, method, response.status().as_u16(), started.elapsed());
    response
}
