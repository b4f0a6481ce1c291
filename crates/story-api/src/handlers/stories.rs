//! Story handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;
use validator::Validate;

use story_models::{JobId, PageId, StoryId, StorySummary};
use story_pipeline::{GenerateStoryRequest, StoryDetail, StoryProgress};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StoryListResponse {
    pub stories: Arc<Vec<StorySummary>>,
}

#[derive(Serialize)]
pub struct RetryPageResponse {
    pub job_id: JobId,
}

/// Create a story and start generating its pages.
pub async fn create_story(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<GenerateStoryRequest>,
) -> ApiResult<(StatusCode, Json<StoryDetail>)> {
    request.personalization.validate()?;

    let detail = state.pipeline.stories.generate_story(&user.uid, request).await?;
    info!(
        user_id = %user.uid,
        story_id = %detail.story.id,
        pages = detail.pages.len(),
        "Story created"
    );

    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_stories(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<StoryListResponse>> {
    let stories = state.pipeline.stories.list_stories(&user.uid).await?;
    Ok(Json(StoryListResponse { stories }))
}

/// Story with pages and progress. Dispatches a reconciliation sweep for
/// stories still generating.
pub async fn get_story(
    State(state): State<AppState>,
    user: AuthUser,
    Path(story_id): Path<StoryId>,
) -> ApiResult<Json<StoryDetail>> {
    let detail = state.pipeline.stories.get_story_detail(&user.uid, &story_id).await?;
    Ok(Json(detail))
}

pub async fn get_story_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(story_id): Path<StoryId>,
) -> ApiResult<Json<StoryProgress>> {
    let progress = state.pipeline.stories.get_story_status(&user.uid, &story_id).await?;
    Ok(Json(progress))
}

/// Resubmit a single page.
pub async fn retry_page(
    State(state): State<AppState>,
    user: AuthUser,
    Path((story_id, page_id)): Path<(StoryId, PageId)>,
) -> ApiResult<Json<RetryPageResponse>> {
    let job_id = state
        .pipeline
        .stories
        .retry_page_generation(&user.uid, &story_id, &page_id)
        .await?;
    Ok(Json(RetryPageResponse { job_id }))
}
