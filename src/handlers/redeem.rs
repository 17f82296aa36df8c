//! Redeem-code claim endpoint.

use axum::{extract::State, http::HeaderMap};
use serde::Deserialize;

use crate::auth::AuthedUser;
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::redeem::{self, RedeemClaim, RedeemClaimResponse};
use crate::util::extract_request_info;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    /// Raw code as typed by the user; normalization happens server-side.
    pub code: String,
}

/// POST /api/v1/redeem
pub async fn claim_code(
    State(state): State<AppState>,
    user: AuthedUser,
    headers: HeaderMap,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<RedeemClaimResponse>> {
    let conn = state.db.get()?;
    let (ip_address, user_agent) = extract_request_info(&headers);

    let response = redeem::claim(
        &conn,
        &state.code_hasher,
        &state.redeem_limiter,
        RedeemClaim {
            user_id: &user.user_id,
            raw_code: &req.code,
            ip_address,
            user_agent,
        },
    )?;

    Ok(Json(response))
}
