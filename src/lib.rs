pub mod backend;
pub mod config;
pub mod cors;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod relay;
pub mod state;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use backend::{mock::MockBackend, ollama::OllamaBackend};
use config::{BackendKind, GatewayConfig};
use tracing::info;

pub fn build_state(config: GatewayConfig) -> Result<state::AppState, std::io::Error> {
    let state = match config.backend {
        BackendKind::Ollama => {
            let backend = OllamaBackend::from_config(&config).map_err(std::io::Error::other)?;
            state::AppState::new(config, Arc::new(backend))
        }
        BackendKind::Mock => state::AppState::new(config, Arc::new(MockBackend::default())),
    };

    info!(
        backend = state.backend.name(),
        backend_url = state.backend.base_url(),
        default_model = %state.config.default_model,
        "generation backend configured"
    );
    Ok(state)
}

pub fn build_app(state: state::AppState) -> Router {
    let llm = Router::new()
        .route("/health", get(handlers::backend_health))
        .route("/models", get(handlers::list_models))
        .route("/models/:model", get(handlers::model_info))
        .route("/generate", post(handlers::generate))
        .route("/stream", post(handlers::stream))
        .route("/chat", post(handlers::chat));

    Router::new()
        .route("/health", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/llm", llm)
        .layer(middleware::from_fn(cors::allow_any_origin))
        .with_state(state)
}
