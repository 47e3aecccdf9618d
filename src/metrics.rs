//! Prometheus counters and gauges for the proxy, plus `/metrics` text
//! exposition.
//!
//! Unlike a process-wide singleton registered through `lazy_static!`
//! against the default registry, `ProxyMetrics` owns its own
//! `prometheus::Registry`: the binary constructs exactly one, but tests
//! construct many scheduler instances side by side and a shared global
//! registry would panic on the second registration of the same metric name.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::proxy::buffer::TraceBufferMetrics;

pub struct ProxyMetrics {
    registry: Registry,
    pub accepted: IntCounter,
    pub rejected: IntCounter,
    pub incomplete: IntCounter,
    pub timed_out: IntCounter,
    pub traces_in_buffer: IntGauge,
    pub spans_in_buffer: IntGauge,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let accepted = IntCounter::new("otre_traces_accepted_total", "traces forwarded and aged out cleanly").unwrap();
        let rejected = IntCounter::new("otre_traces_rejected_total", "traces dropped by policy").unwrap();
        let incomplete = IntCounter::new("otre_traces_incomplete_total", "incomplete traces force-forwarded past abandon age").unwrap();
        let timed_out = IntCounter::new("otre_traces_timed_out_total", "traces dropped after exceeding flush timeout").unwrap();
        let traces_in_buffer = IntGauge::new("otre_traces_in_buffer", "traces currently buffered").unwrap();
        let spans_in_buffer = IntGauge::new("otre_spans_in_buffer", "spans currently buffered").unwrap();

        for metric in [
            Box::new(accepted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rejected.clone()),
            Box::new(incomplete.clone()),
            Box::new(timed_out.clone()),
            Box::new(traces_in_buffer.clone()),
            Box::new(spans_in_buffer.clone()),
        ] {
            registry.register(metric).expect("metric names are unique and registered once");
        }

        ProxyMetrics {
            registry,
            accepted,
            rejected,
            incomplete,
            timed_out,
            traces_in_buffer,
            spans_in_buffer,
        }
    }

    /// Apply a buffer mutation's deltas to the in-buffer gauges. The buffer
    /// itself has no dependency on this type; deltas are the only signal.
    pub fn apply_delta(&self, delta: TraceBufferMetrics) {
        self.traces_in_buffer.add(delta.trace_delta);
        self.spans_in_buffer.add(delta.span_delta);
    }

    /// Render the registered metric families in Prometheus text exposition
    /// format, for `GET /metrics`.
    pub fn export(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics`, serving the process's registered Prometheus metric
/// families in text exposition format.
pub fn router(metrics: Arc<ProxyMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(export_handler))
        .with_state(metrics)
}

async fn export_handler(State(metrics): State<Arc<ProxyMetrics>>) -> impl IntoResponse {
    match metrics.export() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {}", e).into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_delta_moves_gauges() {
        let metrics = ProxyMetrics::new();
        metrics.apply_delta(TraceBufferMetrics { span_delta: 2, trace_delta: 1 });
        assert_eq!(metrics.traces_in_buffer.get(), 1);
        assert_eq!(metrics.spans_in_buffer.get(), 2);
        metrics.apply_delta(TraceBufferMetrics { span_delta: -2, trace_delta: -1 });
        assert_eq!(metrics.traces_in_buffer.get(), 0);
        assert_eq!(metrics.spans_in_buffer.get(), 0);
    }

    #[test]
    fn export_includes_registered_metric_names() {
        let metrics = ProxyMetrics::new();
        metrics.accepted.inc();
        let exported = metrics.export().unwrap();
        let text = String::from_utf8(exported).unwrap();
        assert!(text.contains("otre_traces_accepted_total"));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_exposition() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let metrics = Arc::new(ProxyMetrics::new());
        metrics.rejected.inc();
        let app = router(metrics);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
