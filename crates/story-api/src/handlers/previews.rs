//! Preview image handler.

use axum::extract::State;
use axum::Json;

use story_pipeline::{PreviewRequest, PreviewResult};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_SCENE_LEN: usize = 1000;

/// Generate a single image synchronously.
pub async fn create_preview(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<Json<PreviewResult>> {
    if request.scene_description.len() > MAX_SCENE_LEN {
        return Err(ApiError::bad_request(format!(
            "scene_description exceeds {} characters",
            MAX_SCENE_LEN
        )));
    }

    let result = state.pipeline.stories.generate_preview(&user.uid, request).await?;
    Ok(Json(result))
}
