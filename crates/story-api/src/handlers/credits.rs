//! Credit balance handlers.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use story_models::CreditTransaction;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Maximum allowed limit for transaction history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct CreditsQuery {
    /// Number of recent transactions to return (clamped to 1..100).
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Serialize)]
pub struct CreditsResponse {
    pub balance: u32,
    pub transactions: Vec<CreditTransaction>,
}

/// Current balance and most recent ledger entries for the user.
pub async fn get_credits(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CreditsQuery>,
) -> ApiResult<Json<CreditsResponse>> {
    let limit = query.limit.clamp(1, MAX_LIMIT);
    let ledger = &state.pipeline.ledger;

    let balance = ledger.get_balance(&user.uid).await?;
    let transactions = ledger.recent_transactions(&user.uid, limit).await?;

    Ok(Json(CreditsResponse { balance, transactions }))
}
