use axum::{extract::State, http::StatusCode, Json};
use tracing::instrument;

use crate::{
    app_state::AppState,
    error::BridgeError,
    models::bridge::{AuthRequest, BuyRequest, PlanView},
};

/// GET /bridge/plans
#[instrument(skip(state))]
pub async fn get_plans(State(state): State<AppState>) -> Json<Vec<PlanView>> {
    Json(state.bridge.get_plans().await)
}

/// POST /bridge/buy
#[instrument(skip(state, request))]
pub async fn buy(
    State(state): State<AppState>,
    Json(request): Json<BuyRequest>,
) -> Result<StatusCode, BridgeError> {
    state.bridge.buy(&request.plan_id)?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /bridge/auth
#[instrument(skip(state, request))]
pub async fn set_auth(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> Result<StatusCode, BridgeError> {
    state.bridge.set_auth(&request.token)?;
    Ok(StatusCode::NO_CONTENT)
}
