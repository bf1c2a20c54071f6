use std::{env, time::Duration};

pub const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Ollama,
    Mock,
}

/// Runtime settings for the gateway, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub backend: BackendKind,
    pub backend_url: String,
    pub default_model: String,
    pub default_temperature: f64,
    pub default_max_tokens: u32,
    pub port: u16,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub keep_alive: Duration,
    pub sink_capacity: usize,
    /// Largest unterminated backend record held while waiting for its newline.
    pub max_pending_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ollama,
            backend_url: "http://localhost:11434".to_owned(),
            default_model: "deepseek-coder".to_owned(),
            default_temperature: 0.7,
            default_max_tokens: 1024,
            port: 3000,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            keep_alive: Duration::from_secs(15),
            sink_capacity: 32,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let secs = |key: &str, fallback: Duration| {
            value(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let backend = match value("GATEWAY_BACKEND").as_deref().map(str::trim) {
            Some("mock") => BackendKind::Mock,
            _ => BackendKind::Ollama,
        };

        Self {
            backend,
            backend_url: value("OLLAMA_URL")
                .map(|url| url.trim().trim_end_matches('/').to_owned())
                .unwrap_or(defaults.backend_url),
            default_model: value("DEFAULT_MODEL")
                .map(|model| model.trim().to_owned())
                .unwrap_or(defaults.default_model),
            default_temperature: value("GATEWAY_DEFAULT_TEMPERATURE")
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|temperature| temperature.is_finite() && *temperature >= 0.0)
                .unwrap_or(defaults.default_temperature),
            default_max_tokens: value("GATEWAY_DEFAULT_MAX_TOKENS")
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|tokens| *tokens > 0)
                .unwrap_or(defaults.default_max_tokens),
            port: value("PORT")
                .and_then(|raw| raw.trim().parse::<u16>().ok())
                .unwrap_or(defaults.port),
            connect_timeout: secs("GATEWAY_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            handshake_timeout: secs("GATEWAY_HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout),
            request_timeout: secs("GATEWAY_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            keep_alive: secs("GATEWAY_SSE_KEEPALIVE_SECS", defaults.keep_alive),
            sink_capacity: value("GATEWAY_SINK_CAPACITY")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.sink_capacity),
            max_pending_bytes: value("GATEWAY_MAX_RECORD_BYTES")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.max_pending_bytes),
        }
    }
}
