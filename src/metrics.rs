use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

use crate::models::StreamOutcome;

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_requests: IntGauge,
    active_streams: IntGauge,
    backend_errors_total: IntCounterVec,
    stream_outcomes_total: IntCounterVec,
    malformed_records_total: IntCounter,
}

/// Decrements its gauge on drop. Owned so it can travel into a spawned relay task.
pub struct GaugeGuard {
    gauge: IntGauge,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "gateway_http_requests_total",
                "Total HTTP requests processed by gateway"
            ),
            &["path", "method", "status"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_http_request_duration_seconds",
                "Time until response headers were ready, in seconds",
            ),
            &["path", "method"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_requests = IntGauge::new(
            "gateway_inflight_requests",
            "Current in-flight requests at gateway",
        )
        .expect("valid inflight_requests metric");

        let active_streams = IntGauge::new(
            "gateway_active_streams",
            "Relay sessions currently attached to a backend stream",
        )
        .expect("valid active_streams metric");

        let backend_errors_total = IntCounterVec::new(
            opts!(
                "gateway_backend_errors_total",
                "Total backend-related errors by stage"
            ),
            &["stage"],
        )
        .expect("valid backend_errors_total metric");

        let stream_outcomes_total = IntCounterVec::new(
            opts!(
                "gateway_stream_outcomes_total",
                "Relay sessions by terminal outcome"
            ),
            &["outcome"],
        )
        .expect("valid stream_outcomes_total metric");

        let malformed_records_total = IntCounter::new(
            "gateway_malformed_records_total",
            "Backend records that failed to decode",
        )
        .expect("valid malformed_records_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(inflight_requests.clone()))
            .expect("register inflight_requests");
        registry
            .register(Box::new(active_streams.clone()))
            .expect("register active_streams");
        registry
            .register(Box::new(backend_errors_total.clone()))
            .expect("register backend_errors_total");
        registry
            .register(Box::new(stream_outcomes_total.clone()))
            .expect("register stream_outcomes_total");
        registry
            .register(Box::new(malformed_records_total.clone()))
            .expect("register malformed_records_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_requests,
            active_streams,
            backend_errors_total,
            stream_outcomes_total,
            malformed_records_total,
        }
    }

    pub fn inflight_guard(&self) -> GaugeGuard {
        GaugeGuard::enter(&self.inflight_requests)
    }

    pub fn stream_guard(&self) -> GaugeGuard {
        GaugeGuard::enter(&self.active_streams)
    }

    pub fn observe_request(&self, path: &str, method: &str, status: u16, duration: Duration) {
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, method, &status_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_backend_error(&self, stage: &str) {
        self.backend_errors_total.with_label_values(&[stage]).inc();
    }

    pub fn observe_stream_outcome(&self, outcome: &StreamOutcome) {
        self.stream_outcomes_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn observe_malformed_record(&self) {
        self.malformed_records_total.inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GaugeGuard {
    fn enter(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_guard_tracks_active_sessions() {
        let metrics = AppMetrics::new();
        let guard = metrics.stream_guard();
        assert_eq!(metrics.active_streams.get(), 1);
        drop(guard);
        assert_eq!(metrics.active_streams.get(), 0);
    }

    #[test]
    fn outcomes_are_rendered_by_label() {
        let metrics = AppMetrics::new();
        metrics.observe_stream_outcome(&StreamOutcome::ClientDisconnected);
        metrics.observe_malformed_record();

        let rendered = metrics.render().expect("metrics render");
        assert!(rendered.contains("gateway_stream_outcomes_total{outcome=\"client_disconnected\"} 1"));
        assert!(rendered.contains("gateway_malformed_records_total 1"));
    }
}
