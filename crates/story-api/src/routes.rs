//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    create_preview, create_story, get_credits, get_model, get_story, get_story_status, health, list_stories,
    model_training_webhook, ready, register_model, retry_page, story_page_webhook, train_model,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let story_routes = Router::new()
        .route("/stories", post(create_story).get(list_stories))
        .route("/stories/:story_id", get(get_story))
        .route("/stories/:story_id/status", get(get_story_status))
        .route("/stories/:story_id/pages/:page_id/retry", post(retry_page))
        .route("/previews", post(create_preview));

    let model_routes = Router::new()
        .route("/models", post(register_model))
        .route("/models/:model_id", get(get_model))
        .route("/models/:model_id/train", post(train_model));

    let api_routes = Router::new()
        .route("/credits", get(get_credits))
        .merge(story_routes)
        .merge(model_routes);

    // Called by the job system; authenticated by signed URL token
    let webhook_routes = Router::new()
        .route("/webhooks/story/page", post(story_page_webhook))
        .route("/webhooks/model/training", post(model_training_webhook));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
