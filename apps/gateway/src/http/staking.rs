use super::{ApiResult, AppState};
use anyhow::Context;
use axum::Json;
use axum::extract::{Path, State};
use gateway_core::db::keys::KeyType;
use gateway_core::sweep::load_wallet;
use serde_json::{Value, json};
use tron::TronAddress;
use tron::resources::{parse_account_resources, parse_energy_stake_totals};

async fn energy_delegator(state: &AppState) -> ApiResult<(String, TronAddress)> {
    let key = state.ctx.keys.get_by_type("_", KeyType::Energy).await?.context("no energy delegator key configured")?;
    let addr = TronAddress::from_base58check(&key.public)?;
    Ok((key.public, addr))
}

/// `GET /staking/` and `GET /staking/<address>`, grounded on
/// `original_source/app/api/staking.py::get_resources`. Defaults to the energy delegator account
/// when no address is given.
pub async fn get_resources_default(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (public, _) = energy_delegator(&state).await?;
    resources_for(&state, &public).await
}

pub async fn get_resources(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Json<Value>> {
    resources_for(&state, &address).await
}

async fn resources_for(state: &AppState, address: &str) -> ApiResult<Json<Value>> {
    let addr = TronAddress::from_base58check(address)?;
    let client = state.ctx.connections.client().await?;

    let account_info = client.account(addr).await?;
    let resource_msg = client.account_resource(addr).await?;
    let account_resource = parse_account_resources(&resource_msg).ok();
    let totals = parse_energy_stake_totals(&resource_msg).ok();

    Ok(Json(json!({
        "account_info": account_info,
        "delegated_resources": [],
        "account_resource": account_resource.map(|r| json!({
            "energy_available": r.energy_available(),
            "net_available": r.net_available(),
            "free_net_available": r.free_net_available(),
        })),
        "energy_stake_totals": totals.map(|t| json!({
            "total_limit": t.total_limit,
            "total_weight": t.total_weight,
        })),
    })))
}

/// `POST /staking/freeze/<amount>/<res_type>`, grounded on
/// `original_source/app/api/staking.py::stake_trx`.
pub async fn freeze(State(state): State<AppState>, Path((amount, res_type)): Path<(u64, String)>) -> ApiResult<Json<Value>> {
    let (public, addr) = energy_delegator(&state).await?;
    let wallet = load_wallet(&state.ctx, &public).await?;
    let client = state.ctx.connections.client().await?;

    let unsigned = client.freeze_balance_v2(addr, amount * 1_000_000, &res_type).await?;
    let signed = wallet.sign(unsigned)?;
    let result = client.broadcast_transaction(signed.tx).await?;
    Ok(Json(result))
}

/// `POST /staking/unfreeze/<amount>/<res_type>`, grounded on
/// `original_source/app/api/staking.py::unstake_trx`.
pub async fn unfreeze(State(state): State<AppState>, Path((amount, res_type)): Path<(u64, String)>) -> ApiResult<Json<Value>> {
    let (public, addr) = energy_delegator(&state).await?;
    let wallet = load_wallet(&state.ctx, &public).await?;
    let client = state.ctx.connections.client().await?;

    let unsigned = client.unfreeze_balance_v2(addr, amount * 1_000_000, &res_type).await?;
    let signed = wallet.sign(unsigned)?;
    let result = client.broadcast_transaction(signed.tx).await?;
    Ok(Json(result))
}

/// `POST /staking/withdraw_unfreezed`, grounded on
/// `original_source/app/api/staking.py::withdraw_unstaked_trx`.
pub async fn withdraw_unfreezed(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (public, addr) = energy_delegator(&state).await?;
    let wallet = load_wallet(&state.ctx, &public).await?;
    let client = state.ctx.connections.client().await?;

    let unsigned = client.withdraw_expire_unfreeze(addr).await?;
    let signed = wallet.sign(unsigned)?;
    let result = client.broadcast_transaction(signed.tx).await?;
    Ok(Json(result))
}

/// `POST /staking/claim_voting_reward`, grounded on
/// `original_source/app/api/staking.py::claim_voting_reward`.
pub async fn claim_voting_reward(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (public, addr) = energy_delegator(&state).await?;
    let wallet = load_wallet(&state.ctx, &public).await?;
    let client = state.ctx.connections.client().await?;

    let unsigned = client.withdraw_balance(addr).await?;
    let signed = wallet.sign(unsigned)?;
    let result = client.broadcast_transaction(signed.tx).await?;
    Ok(Json(result))
}

/// `POST /staking/grant_permissions` — a stub in the original too (`pass`), pending the
/// `AccountPermissionUpdate` prerequisites its docstring describes; left unimplemented here for
/// the same reason rather than invented.
pub async fn grant_permissions() -> Json<Value> {
    Json(json!({ "status": "not_implemented" }))
}
