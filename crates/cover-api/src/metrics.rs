//! HTTP metrics middleware and the Prometheus exporter.
//!
//! Records request duration and throughput per matched route, and renders
//! every metric registered through the `metrics` facade, including the
//! orchestration metrics recorded by `cover-flow`.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use cover_flow::metrics::names;

/// API request duration histogram.
pub const API_REQUEST_DURATION: &str = "api_request_duration_seconds";

/// API request counter.
pub const API_REQUEST_TOTAL: &str = "api_request_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with the Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops. If another
/// recorder is already installed the returned handle renders nothing and a
/// warning is logged.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = metrics::set_global_recorder(recorder) {
                tracing::warn!(error = %e, "metrics recorder already installed");
            }

            describe_histogram!(API_REQUEST_DURATION, "Duration of API requests in seconds");
            describe_counter!(API_REQUEST_TOTAL, "Total number of API requests");
            describe_counter!(names::RESOLVE_TOTAL, "Coverage resolutions by outcome");
            describe_counter!(names::RUNS_TOTAL, "Completed coverage runs by result");
            describe_histogram!(
                names::RUN_DURATION_SECONDS,
                "Duration of coverage runs in seconds"
            );
            describe_gauge!(
                names::ADMISSION_OUTSTANDING,
                "Admission tokens currently held by coverage runs"
            );
            describe_counter!(
                names::OVERFLOW_PUBLISHED_TOTAL,
                "Overflow queue publishes by delivery result"
            );

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub(crate) fn endpoint_label<B>(request: &Request<B>) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware that records request metrics.
///
/// Captures:
/// - `api_request_duration_seconds{endpoint, method, status_class}`
/// - `api_request_total{endpoint, method, status_class}`
///
/// Badge routes use a wildcard, so the repository never becomes a label.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status_class = status_class(response.status());
    let labels = [
        ("endpoint", path.clone()),
        ("method", method.clone()),
        ("status_class", status_class.to_string()),
    ];

    histogram!(API_REQUEST_DURATION, &labels).record(duration);
    counter!(API_REQUEST_TOTAL, &labels).increment(1);

    if duration > 1.0 {
        tracing::warn!(
            endpoint = %path,
            method = %method,
            status = response.status().as_u16(),
            duration_secs = %duration,
            "Slow request detected"
        );
    }

    response
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// Handler for the `/metrics` endpoint.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::NOT_FOUND), "4xx");
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), "5xx");
    }

    #[test]
    fn unmatched_requests_share_a_label() -> anyhow::Result<()> {
        let request = Request::builder().uri("/missing").body(Body::empty())?;
        assert_eq!(endpoint_label(&request), UNMATCHED_ENDPOINT);
        Ok(())
    }

    #[tokio::test]
    async fn wildcard_routes_do_not_leak_repositories() -> anyhow::Result<()> {
        let handle = init_metrics();
        let app = Router::new()
            .route("/go/*repo", get(|| async { StatusCode::OK }))
            .route_layer(axum::middleware::from_fn(metrics_middleware));

        let request = Request::builder()
            .uri("/go/github.com/acme/widget.svg")
            .body(Body::empty())?;
        let _response = app.oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;

        let rendered = handle.render();
        assert!(rendered
            .lines()
            .any(|line| line.starts_with(API_REQUEST_TOTAL) && line.contains("endpoint=\"/go/*repo\"")));
        assert!(!rendered.contains("acme/widget"));
        Ok(())
    }
}
