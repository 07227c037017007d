mod accounts;
mod metrics;
mod multiserver;
mod payout;
mod staking;

use crate::executor::PayoutSender;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use gateway_core::GatewayContext;
use gateway_core::error::GatewayError;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<GatewayContext>,
    pub payouts: PayoutSender,
}

/// Wraps `anyhow::Error` so handlers can use `?` freely; mirrors the original's
/// `{status: "error", msg}` JSON error body (spec §7).
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<GatewayError>() {
            Some(GatewayError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(GatewayError::NoServerSet | GatewayError::AllServersOffline) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(json!({ "status": "error", "msg": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Builds the full HTTP surface (spec §6 route table plus the supplemented routes noted in
/// SPEC_FULL.md §9A), grounded on `original_source/app/api/{views,payout,staking,metrics}.py`.
pub fn build_router(ctx: Arc<GatewayContext>, payouts: PayoutSender) -> Router {
    let state = AppState { ctx, payouts };

    Router::new()
        .route("/generate-address", post(accounts::generate_address))
        .route("/balance", post(accounts::balance))
        .route("/status", post(accounts::status))
        .route("/transaction/{txid}", post(accounts::transaction))
        .route("/fee-deposit-account", post(accounts::fee_deposit_account))
        .route("/dump", post(accounts::dump))
        .route("/addresses", get(accounts::addresses))
        .route("/payout/{to}/{amount}", post(payout::payout))
        .route("/multipayout", post(payout::multipayout))
        .route("/calc-tx-fee/{amount}", post(payout::calc_tx_fee))
        .route("/task/{id}", post(payout::get_task))
        .route("/multiserver/status", get(multiserver::status))
        .route("/multiserver/change/{id}", post(multiserver::change))
        .route("/multiserver/switch-to-best", post(multiserver::switch_to_best))
        .route("/staking/", get(staking::get_resources_default))
        .route("/staking/{address}", get(staking::get_resources))
        .route("/staking/freeze/{amount}/{res_type}", post(staking::freeze))
        .route("/staking/unfreeze/{amount}/{res_type}", post(staking::unfreeze))
        .route("/staking/withdraw_unfreezed", post(staking::withdraw_unfreezed))
        .route("/staking/claim_voting_reward", post(staking::claim_voting_reward))
        .route("/staking/grant_permissions", post(staking::grant_permissions))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
