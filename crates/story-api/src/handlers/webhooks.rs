//! Inbound webhooks from the external job system.
//!
//! Both endpoints acknowledge with 200 once the token and job id check out,
//! even when applying the result fails. Results lost here are recovered by
//! the reconciliation sweeper.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use story_models::{JobId, WebhookPayload};
use story_pipeline::{ResultSource, TransitionEffect, WebhookScope};

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_webhook;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<TransitionEffect>,
}

impl WebhookAck {
    fn new(applied: bool, effect: Option<TransitionEffect>) -> Self {
        Self {
            received: true,
            applied,
            effect,
        }
    }
}

fn authorize(state: &AppState, scope: WebhookScope, query: &WebhookQuery, label: &'static str) -> ApiResult<()> {
    if state.pipeline.signer.verify(scope, query.token.as_deref()) {
        return Ok(());
    }
    warn!(scope = scope.path(), "Webhook rejected: invalid token");
    record_webhook(label, "unauthorized");
    Err(ApiError::unauthorized("Invalid webhook token"))
}

fn require_job_id(payload: &WebhookPayload, label: &'static str) -> ApiResult<JobId> {
    payload.job_id().ok_or_else(|| {
        record_webhook(label, "invalid");
        ApiError::bad_request("request_id is required")
    })
}

/// Page image job finished.
pub async fn story_page_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<Json<WebhookAck>> {
    const LABEL: &str = "story_page";
    authorize(&state, WebhookScope::StoryPage, &query, LABEL)?;
    let job_id = require_job_id(&payload, LABEL)?;

    info!(job_id = %job_id, status = %payload.report.status, "Page webhook received");

    let ack = match state
        .pipeline
        .machine
        .apply_job_result(&job_id, &payload.report, ResultSource::Webhook)
        .await
    {
        Ok(Some(effect)) => {
            record_webhook(LABEL, if effect.is_applied() { "applied" } else { "skipped" });
            WebhookAck::new(effect.is_applied(), Some(effect))
        }
        Ok(None) => {
            record_webhook(LABEL, "unknown_job");
            WebhookAck::new(false, None)
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to apply page webhook");
            record_webhook(LABEL, "error");
            WebhookAck::new(false, None)
        }
    };

    Ok(Json(ack))
}

/// LoRA training job finished.
pub async fn model_training_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<Json<WebhookAck>> {
    const LABEL: &str = "model_training";
    authorize(&state, WebhookScope::ModelTraining, &query, LABEL)?;
    let job_id = require_job_id(&payload, LABEL)?;

    info!(job_id = %job_id, status = %payload.report.status, "Training webhook received");

    let applied = match state
        .pipeline
        .subjects
        .apply_training_result(&job_id, &payload.report)
        .await
    {
        Ok(applied) => {
            record_webhook(LABEL, if applied { "applied" } else { "skipped" });
            applied
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to apply training webhook");
            record_webhook(LABEL, "error");
            false
        }
    };

    Ok(Json(WebhookAck::new(applied, None)))
}
