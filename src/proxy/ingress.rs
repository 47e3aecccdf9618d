//! HTTP intake adapter: decodes wire-format spans and pushes them into the
//! buffer. Glue around the codec, not core decision logic, but a runnable
//! proxy needs it.

use std::io::Read;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use flate2::read::GzDecoder;
use tracing::{error, warn};

use crate::metrics::ProxyMetrics;
use crate::proxy::buffer::TraceBuffer;
use crate::proxy::codec;

#[derive(Clone)]
pub struct IngressState {
    pub buffer: Arc<TraceBuffer>,
    pub metrics: Arc<ProxyMetrics>,
}

/// Router serving `POST /api/v1/spans` and `POST /api/v2/spans`, identical
/// handling: v2 is accepted as an alias, since the buffer and policy only
/// ever see the common Zipkin v1 span shape.
pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/api/v1/spans", post(receive_spans))
        .route("/api/v2/spans", post(receive_spans))
        .with_state(state)
}

async fn receive_spans(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let gzipped = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    let decompressed;
    let raw: &[u8] = if gzipped {
        let mut decoder = GzDecoder::new(&body[..]);
        let mut buf = Vec::new();
        if let Err(e) = decoder.read_to_end(&mut buf) {
            error!(error = %e, "failed to read gzip-encoded request body");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        decompressed = buf;
        &decompressed
    } else {
        &body
    };

    let spans = match codec::decode(&content_type, raw) {
        Ok(spans) => spans,
        Err(e) => {
            warn!(error = %e, content_type = %content_type, "rejecting span payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    for span in spans {
        let delta = state.buffer.add_span(span);
        state.metrics.apply_delta(delta);
    }

    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> IngressState {
        IngressState {
            buffer: Arc::new(TraceBuffer::new()),
            metrics: Arc::new(ProxyMetrics::new()),
        }
    }

    #[tokio::test]
    async fn json_body_is_accepted() {
        let state = state();
        let buffer = state.buffer.clone();
        let app = router(state);
        let body = r#"[{"traceId":"1","name":"op","id":"1","annotations":[],"binaryAnnotations":[],"timestamp":1,"duration":1}]"#;
        let response = app
            .oneshot(
                Request::post("/api/v1/spans")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(buffer.trace_count(), 1);
    }

    #[tokio::test]
    async fn v2_path_is_an_alias_for_v1() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::post("/api/v2/spans")
                    .header("content-type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn unknown_content_type_is_bad_request() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::post("/api/v1/spans")
                    .header("content-type", "application/x-unknown")
                    .body(Body::from("whatever"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn gzipped_json_body_is_accepted() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"[]").unwrap();
        let compressed = encoder.finish().unwrap();

        let app = router(state());
        let response = app
            .oneshot(
                Request::post("/api/v1/spans")
                    .header("content-type", "application/json")
                    .header("content-encoding", "gzip")
                    .body(Body::from(compressed))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
