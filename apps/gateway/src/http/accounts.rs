use super::{ApiResult, AppState};
use axum::Json;
use axum::extract::{Path, Query, State};
use gateway_core::db::keys::KeyType;
use gateway_core::encryption::EXTERNALLY_MANAGED_SENTINEL;
use gateway_core::sweep::balance_for_symbol;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde_json::{Value, json};
use tron::TronAddress;

/// `symbol` is threaded through as a query parameter (default `"TRX"`) rather than a URL
/// namespace segment: KeyStore rows stay partitioned under the single `"_"` symbol used
/// throughout `gateway-core`, and `symbol` here only selects which balance/contract an
/// operation concerns (same role it plays in `sweep::run_sweep`).
#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    #[serde(default)]
    pub symbol: Option<String>,
}

impl SymbolQuery {
    fn symbol(&self) -> String {
        self.symbol.clone().unwrap_or_else(|| "TRX".to_string())
    }
}

/// `POST /generate-address` — mints a fresh onetime deposit key and adds it to the watched set,
/// grounded on `original_source/app/api/views.py::generate_new_address`.
pub async fn generate_address(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let signing_key = SigningKey::random(&mut OsRng);
    let address = TronAddress::from_verifying_key(signing_key.verifying_key());
    let public = address.to_base58check();
    let private_hex = hex::encode(signing_key.to_bytes());
    let ciphertext = state.ctx.encryption.encrypt(&private_hex)?;

    state.ctx.keys.add_key("_", KeyType::Onetime, &public, Some(&ciphertext), false).await?;
    state.ctx.watched.insert(public.clone());

    Ok(Json(json!({ "status": "success", "base58check_address": public })))
}

/// `POST /balance` — treasury (fee-deposit) balance in the requested symbol, grounded on
/// `original_source/app/wallet.py::Wallet.balance`. Also refreshes the balance cache row.
pub async fn balance(State(state): State<AppState>, Query(q): Query<SymbolQuery>) -> ApiResult<Json<Value>> {
    let symbol = q.symbol();
    let treasury = state.ctx.keys.get_by_type("_", KeyType::FeeDeposit).await?;
    let Some(treasury) = treasury else {
        return Ok(Json(json!({ "status": "success", "balance": 0 })));
    };
    let start = std::time::Instant::now();

    let address = TronAddress::from_base58check(&treasury.public)?;
    let client = state.ctx.connections.client().await?;
    let balance = balance_for_symbol(&state.ctx, &client, address, &symbol).await?;

    state.ctx.balances.upsert(&treasury.public, &symbol, &balance.to_string()).await?;

    Ok(Json(json!({
        "status": "success",
        "balance": balance.to_string(),
        "query_time": start.elapsed().as_secs_f64(),
    })))
}

/// `POST /status` — timestamp of the last block the scanner processed, grounded on
/// `original_source/app/api/views.py::get_status`.
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let last_seen = state.ctx.settings.get_u64(gateway_core::db::settings::LAST_SEEN_BLOCK_NUM).await?.unwrap_or(0);
    let client = state.ctx.connections.client().await?;
    let block = client.block_by_num(last_seen).await?;
    let timestamp_ms = block
        .get("block_header")
        .and_then(|h| h.get("raw_data"))
        .and_then(|d| d.get("timestamp"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(Json(json!({ "status": "success", "last_block_timestamp": timestamp_ms / 1000 })))
}

/// `POST /transaction/<txid>` — watched-account legs of one transaction, grounded on
/// `original_source/app/api/views.py::get_transaction` (native transfers from the raw tx,
/// TRC-20 transfers from the receipt's logs, mirroring the scanner's own `parse_tx`).
pub async fn transaction(State(state): State<AppState>, Path(txid): Path<String>) -> ApiResult<Json<Value>> {
    let client = state.ctx.connections.client().await?;
    let raw = client.transaction_by_id(&txid).await?;
    let info = client.transaction_info_by_id(&txid).await?;

    let tx_block = info.get("blockNumber").and_then(Value::as_u64);
    let head = client.now_block().await.ok().and_then(|b| {
        b.get("block_header").and_then(|h| h.get("raw_data")).and_then(|d| d.get("number")).and_then(Value::as_u64)
    });
    let confirmations = match (head, tx_block) {
        (Some(head), Some(tx_block)) => head.saturating_sub(tx_block).max(1),
        _ => 1,
    };

    let mut legs = Vec::new();

    let contract_type = raw.get("raw_data").and_then(|d| d.get("contract")).and_then(Value::as_array).and_then(|c| c.first()).and_then(|c| c.get("type")).and_then(Value::as_str);
    if contract_type == Some("TransferContract") {
        if let Some(value) = raw
            .get("raw_data")
            .and_then(|d| d.get("contract"))
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("parameter"))
            .and_then(|p| p.get("value"))
        {
            if let Some(to_hex) = value.get("to_address").and_then(Value::as_str) {
                if let Ok(to) = TronAddress::from_hex41(to_hex) {
                    let dst = to.to_base58check();
                    if state.ctx.watched.contains(&dst) {
                        let amount = value.get("amount").and_then(Value::as_u64).unwrap_or(0);
                        legs.push(json!({ "address": dst, "amount": amount, "confirmations": confirmations, "category": "receive" }));
                    }
                }
            }
        }
    }

    if let Some(logs) = info.get("log").and_then(Value::as_array) {
        for log in logs {
            let Some(topics) = log.get("topics").and_then(Value::as_array) else { continue };
            let topics: Vec<String> = topics.iter().filter_map(|t| t.as_str().map(str::to_string)).collect();
            let Some(data_hex) = log.get("data").and_then(Value::as_str) else { continue };
            let Ok(transfer) = tron::events::decode_transfer_log(&topics, data_hex) else { continue };
            let dst = transfer.to.to_base58check();
            if !state.ctx.watched.contains(&dst) {
                continue;
            }
            legs.push(json!({
                "address": dst,
                "amount": transfer.amount,
                "confirmations": confirmations,
                "category": "receive",
            }));
        }
    }

    Ok(Json(json!(legs)))
}

/// `POST /fee-deposit-account` — treasury address and native balance, grounded on
/// `original_source/app/api/views.py::get_fee_deposit_account`.
pub async fn fee_deposit_account(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let Some(treasury) = state.ctx.keys.get_by_type("_", KeyType::FeeDeposit).await? else {
        return Ok(Json(json!({ "account": null, "balance": 0 })));
    };
    let address = TronAddress::from_base58check(&treasury.public)?;
    let client = state.ctx.connections.client().await?;
    let balance = client.account(address).await?.get("balance").and_then(Value::as_u64).unwrap_or(0);

    Ok(Json(json!({ "account": treasury.public, "balance": balance })))
}

/// `POST /dump` — every key this gateway can sign with, in cleartext, grounded on
/// `original_source/app/api/views.py::dump`. Intentionally unauthenticated in the original;
/// left that way here too since the whole HTTP surface sits behind Keeper's own access control.
pub async fn dump(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut accounts = Vec::new();
    for key in state.ctx.keys.all_with_private().await? {
        let private = match &key.private {
            Some(ciphertext) => state.ctx.encryption.decrypt(ciphertext)?,
            None => EXTERNALLY_MANAGED_SENTINEL.to_string(),
        };
        accounts.push(json!({
            "public": key.public,
            "private": private,
            "type": key.key_type.as_str(),
            "symbol": key.symbol,
        }));
    }
    Ok(Json(json!({ "accounts": accounts })))
}

/// `GET /addresses` — every public address on file, grounded on
/// `original_source/app/api/views.py::list_addresses`.
pub async fn addresses(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut out = Vec::new();
    for t in [KeyType::Onetime, KeyType::OnlyRead, KeyType::FeeDeposit, KeyType::Energy] {
        for key in state.ctx.keys.list_by_type("_", t).await? {
            out.push(key.public);
        }
    }
    Ok(Json(json!({ "accounts": out })))
}
