//! Axum HTTP API server.
//!
//! This crate provides:
//! - Story, preview and subject model endpoints
//! - Webhook receivers for the external job system
//! - Security headers, request ids and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, StoreBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
