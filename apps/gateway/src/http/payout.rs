use super::{ApiError, ApiResult, AppState};
use anyhow::{Context, bail};
use axum::Json;
use axum::extract::{Path, Query, State};
use gateway_core::db::keys::KeyType;
use gateway_core::db::tasks::TaskStatus;
use gateway_core::planner::PayoutRequest;
use gateway_core::sweep::balance_for_symbol;
use serde::Deserialize;
use serde_json::{Value, json};
use tron::TronAddress;

/// `POST /calc-tx-fee/<amount>`, grounded on
/// `original_source/app/api/payout.py::calc_tx_fee`. `amount` is accepted but unused, matching
/// the original (the fee is flat regardless of payout size).
pub async fn calc_tx_fee(State(state): State<AppState>, Path(_amount): Path<String>) -> Json<Value> {
    Json(json!({ "fee": state.ctx.config.fees.tx_fee_sun }))
}

#[derive(Debug, Deserialize)]
pub struct MultipayoutEntry {
    pub dest: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct MultipayoutQuery {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub dryrun: Option<String>,
}

/// `POST /multipayout?dryrun`, grounded on `original_source/app/api/payout.py::multipayout`:
/// validates every destination/amount up front, checks the treasury can cover both the token
/// total and the flat per-leg TRX fee, then either reports the dry-run totals or enqueues the
/// batch onto the Payout Executor.
pub async fn multipayout(
    State(state): State<AppState>,
    Query(q): Query<MultipayoutQuery>,
    Json(payout_list): Json<Vec<MultipayoutEntry>>,
) -> ApiResult<Json<Value>> {
    if payout_list.is_empty() {
        bail!("payout list is empty");
    }
    for entry in &payout_list {
        TronAddress::from_base58check(&entry.dest).with_context(|| format!("bad destination address {}", entry.dest))?;
        if entry.amount == 0 {
            bail!("payout amount should be positive: {}", entry.dest);
        }
    }

    let symbol = q.symbol.clone().unwrap_or_else(|| "TRX".to_string());
    let need_tokens: u64 = payout_list.iter().map(|e| e.amount).sum();
    let need_currency = (payout_list.len() as u64) * state.ctx.config.fees.tx_fee_sun;

    let treasury = state.ctx.keys.get_by_type("_", KeyType::FeeDeposit).await?.context("no treasury key configured")?;
    let treasury_addr = TronAddress::from_base58check(&treasury.public)?;
    let client = state.ctx.connections.client().await?;

    let have_tokens = balance_for_symbol(&state.ctx, &client, treasury_addr, &symbol).await? as u64;
    let have_currency = balance_for_symbol(&state.ctx, &client, treasury_addr, "TRX").await? as u64;

    if have_currency < need_currency {
        bail!(
            "not enough TRX at fee-deposit account {} to pay payout fees. has: {have_currency}, need: {need_currency}",
            treasury.public
        );
    }

    if q.dryrun.is_some() {
        return Ok(Json(json!({
            "currency": { "need": need_currency, "have": have_currency },
            "tokens": { "need": need_tokens, "have": have_tokens },
        })));
    }

    let requests: Vec<PayoutRequest> = payout_list.into_iter().map(|e| PayoutRequest { dest: e.dest, amount: e.amount }).collect();
    enqueue(&state, symbol, requests).await
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    #[serde(default)]
    pub symbol: Option<String>,
}

/// `POST /payout/<to>/<amount>`, grounded on `original_source/app/api/payout.py::payout`.
pub async fn payout(
    State(state): State<AppState>,
    Query(q): Query<SymbolQuery>,
    Path((to, amount)): Path<(String, u64)>,
) -> ApiResult<Json<Value>> {
    TronAddress::from_base58check(&to).with_context(|| format!("bad destination address {to}"))?;
    let symbol = q.symbol.clone().unwrap_or_else(|| "TRX".to_string());
    enqueue(&state, symbol, vec![PayoutRequest { dest: to, amount }]).await
}

async fn enqueue(state: &AppState, symbol: String, requests: Vec<PayoutRequest>) -> ApiResult<Json<Value>> {
    let task_id = state.ctx.tasks.create().await?;
    state
        .ctx
        .keys
        .get_by_type("_", KeyType::FeeDeposit)
        .await?
        .context("no treasury key configured")?;

    let job = crate::executor::PayoutJob { task_id: task_id.clone(), symbol, requests };
    state.payouts.send(job).await.map_err(|_| ApiError::from(anyhow::anyhow!("payout executor channel closed")))?;

    Ok(Json(json!({ "task_id": task_id })))
}

/// `POST /task/<id>`, grounded on `original_source/app/api/payout.py::get_task`.
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let Some(task) = state.ctx.tasks.get(&id).await? else {
        return Ok(Json(json!({ "status": TaskStatus::Pending.as_str(), "result": Value::Null })));
    };
    Ok(Json(json!({ "status": task.status.as_str(), "result": task.result })))
}
