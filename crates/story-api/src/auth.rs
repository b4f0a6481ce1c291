//! Authenticated user extraction.
//!
//! Token verification happens in the upstream auth layer, which forwards the
//! verified user id in `x-user-id`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
}

/// Axum extractor for authenticated user.
///
/// Creates the user's credit account (with signup credits) on first sight.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let uid = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Missing user identity"))?;

        if uid.len() > MAX_USER_ID_LEN {
            return Err(ApiError::unauthorized("Invalid user identity"));
        }

        if state.pipeline.ledger.ensure_account(uid).await? {
            debug!(user_id = %uid, "First request from user");
        }

        Ok(AuthUser { uid: uid.to_string() })
    }
}
