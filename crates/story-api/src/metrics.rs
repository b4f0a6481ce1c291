//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "storybook_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "storybook_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "storybook_http_requests_in_flight";

    // Webhook metrics
    pub const WEBHOOKS_RECEIVED_TOTAL: &str = "storybook_webhooks_received_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a webhook receipt and what it did.
pub fn record_webhook(scope: &'static str, outcome: &'static str) {
    counter!(names::WEBHOOKS_RECEIVED_TOTAL, "scope" => scope, "outcome" => outcome).increment(1);
}

fn id_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"/stories/[A-Za-z0-9_-]+", "/stories/:story_id"),
            (r"/pages/[A-Za-z0-9_-]+", "/pages/:page_id"),
            (r"/models/[A-Za-z0-9_-]+", "/models/:model_id"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Sanitize path for metrics labels (remove IDs).
fn sanitize_path(path: &str) -> String {
    id_patterns()
        .iter()
        .fold(path.to_string(), |path, (re, replacement)| {
            re.replace_all(&path, *replacement).into_owned()
        })
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
