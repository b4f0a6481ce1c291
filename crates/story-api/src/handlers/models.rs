//! Subject model handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use story_models::{SubjectModel, SubjectModelId};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterModelRequest {
    #[validate(length(min = 1, max = 80))]
    pub name: String,
    #[validate(url)]
    pub reference_image_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrainModelRequest {
    /// Zip archive of training photos
    #[validate(url)]
    pub images_data_url: String,
    #[validate(length(min = 1, max = 32))]
    #[serde(default)]
    pub trigger_word: Option<String>,
}

pub async fn register_model(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<RegisterModelRequest>,
) -> ApiResult<(StatusCode, Json<SubjectModel>)> {
    request.validate()?;

    let model = state
        .pipeline
        .subjects
        .register_reference(&user.uid, &request.name, &request.reference_image_url)
        .await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// Start LoRA training for a registered subject.
pub async fn train_model(
    State(state): State<AppState>,
    user: AuthUser,
    Path(model_id): Path<SubjectModelId>,
    Json(request): Json<TrainModelRequest>,
) -> ApiResult<(StatusCode, Json<SubjectModel>)> {
    request.validate()?;

    let model = state
        .pipeline
        .subjects
        .start_training(
            &user.uid,
            &model_id,
            &request.images_data_url,
            request.trigger_word.as_deref(),
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(model)))
}

pub async fn get_model(
    State(state): State<AppState>,
    user: AuthUser,
    Path(model_id): Path<SubjectModelId>,
) -> ApiResult<Json<SubjectModel>> {
    let model = state.pipeline.subjects.get_model(&user.uid, &model_id).await?;
    Ok(Json(model))
}
