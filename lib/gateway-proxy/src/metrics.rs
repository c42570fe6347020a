//! Prometheus metrics for the gateway surfaces

use anyhow::Result;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Label used for requests that did not resolve to a registered service
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Metrics shared by the HTTP gateway and the registration endpoint.
/// Clones share the same underlying registry.
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Gateway requests by service and HTTP status
    pub requests_total: CounterVec,
    /// Latency of backend RPC calls
    pub backend_duration_seconds: HistogramVec,
    /// Registration RPCs by action and status code
    pub registrations_total: CounterVec,
    /// Services currently in the registry
    pub registered_services: IntGauge,
    pub registry: Arc<Registry>,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Gateway HTTP requests by service and status"),
            &["service", "status"],
        )?;

        let backend_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_backend_duration_seconds",
                "Backend RPC latency in seconds",
            ),
            &["service"],
        )?;

        let registrations_total = CounterVec::new(
            Opts::new(
                "gateway_registrations_total",
                "Registration RPCs by action and status code",
            ),
            &["action", "status"],
        )?;

        let registered_services = IntGauge::new(
            "gateway_registered_services",
            "Services currently known to this node",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(backend_duration_seconds.clone()))?;
        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(registered_services.clone()))?;

        Ok(Self {
            requests_total,
            backend_duration_seconds,
            registrations_total,
            registered_services,
            registry,
        })
    }

    pub fn record_request(&self, service: &str, status: u16) {
        self.requests_total
            .with_label_values(&[service, &status.to_string()])
            .inc();
    }

    pub fn record_registration(&self, action: &str, status: u16) {
        self.registrations_total
            .with_label_values(&[action, &status.to_string()])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = GatewayMetrics::new().expect("Failed to create metrics");
        let text = metrics.gather().expect("Failed to gather metrics");
        assert!(text.contains("gateway_registered_services"));
    }

    #[test]
    fn test_clones_share_registry() {
        let metrics = GatewayMetrics::new().unwrap();
        let clone = metrics.clone();
        clone.record_request("orders", 200);
        clone.record_registration("Register", 400);

        let text = metrics.gather().unwrap();
        assert!(text.contains("# TYPE gateway_requests_total counter"));
        assert!(text.contains("service=\"orders\""));
        assert!(text.contains("gateway_registrations_total"));
    }
}
