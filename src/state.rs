use std::sync::Arc;

use crate::{
    backend::GenerationBackend, config::GatewayConfig, metrics::AppMetrics,
    relay::RelayController,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub backend: Arc<dyn GenerationBackend>,
    pub relay: Arc<RelayController>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new<B>(config: GatewayConfig, backend: Arc<B>) -> Self
    where
        B: GenerationBackend + 'static,
    {
        let backend: Arc<dyn GenerationBackend> = backend;
        let metrics = Arc::new(AppMetrics::new());
        let relay = RelayController::new(backend.clone(), metrics.clone())
            .with_max_pending_bytes(config.max_pending_bytes);
        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            backend,
            metrics,
        }
    }

    pub fn new_for_tests<B>(backend: Arc<B>) -> Self
    where
        B: GenerationBackend + 'static,
    {
        let config = GatewayConfig {
            sink_capacity: 4,
            ..GatewayConfig::default()
        };
        Self::new(config, backend)
    }
}
