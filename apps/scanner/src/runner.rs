use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use gateway_core::GatewayContext;
use gateway_core::db::settings::LAST_SEEN_BLOCK_NUM;
use gateway_core::error::GatewayError;
use lru::LruCache;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tron::ChainClient;
use tron::TronAddress;
use tron::events::decode_transfer_log;

/// Per-chunk cache of downloaded blocks and per-block tx-info maps, sized to the chunk so the
/// fan-out over `scan_block` never re-fetches the same block (spec §4.3: "bounded LRU of size =
/// chunk size"). Also replaces the former one-RPC-per-tx `transaction_info_by_id` call with a
/// single bulk `transaction_info_by_block_num` fetch per block.
struct ChunkCache {
    blocks: Mutex<LruCache<u64, Arc<Value>>>,
    tx_infos: Mutex<LruCache<u64, Arc<HashMap<String, Value>>>>,
}

impl ChunkCache {
    fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { blocks: Mutex::new(LruCache::new(cap)), tx_infos: Mutex::new(LruCache::new(cap)) }
    }

    async fn block(&self, client: &ChainClient, height: u64) -> Result<Arc<Value>> {
        if let Some(v) = self.blocks.lock().await.get(&height) {
            return Ok(v.clone());
        }
        let block = Arc::new(client.block_by_num(height).await?);
        self.blocks.lock().await.put(height, block.clone());
        Ok(block)
    }

    /// Keyed by txid, containing only entries with a `log` field (smart-contract call receipts),
    /// mirroring `original_source/app/block_scanner.py::download_tx_info_by_block_num`.
    async fn tx_info_map(&self, client: &ChainClient, height: u64) -> Result<Arc<HashMap<String, Value>>> {
        if let Some(v) = self.tx_infos.lock().await.get(&height) {
            return Ok(v.clone());
        }
        let raw = client.transaction_info_by_block_num(height).await?;
        let map: HashMap<String, Value> = raw
            .as_array()
            .into_iter()
            .flatten()
            .filter(|r| r.get("log").is_some())
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(|id| (id.to_string(), r.clone())))
            .collect();
        let map = Arc::new(map);
        self.tx_infos.lock().await.put(height, map.clone());
        Ok(map)
    }
}

/// One transfer derived from a single on-chain transaction. A `TriggerSmartContract` call can
/// emit several `Transfer` logs, so one tx may yield multiple entries (spec §4.3.1).
#[derive(Debug, Clone)]
struct ParsedTransfer {
    txid: String,
    symbol: String,
    src: TronAddress,
    dst: TronAddress,
    /// Raw chain units: sun for native TRX, raw token units for TRC-20.
    amount_raw: u128,
    is_trc20: bool,
}

fn contract_of(tx: &Value) -> Option<&Value> {
    tx.get("raw_data")?.get("contract")?.as_array()?.first()
}

fn contract_type(tx: &Value) -> Option<&str> {
    contract_of(tx)?.get("type")?.as_str()
}

fn contract_succeeded(tx: &Value) -> bool {
    tx.get("ret")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .and_then(|r| r.get("contractRet"))
        .and_then(Value::as_str)
        == Some("SUCCESS")
}

fn parse_transfer_contract(tx: &Value) -> Result<ParsedTransfer> {
    let txid = tx.get("txID").and_then(Value::as_str).context("tx missing txID")?.to_string();
    let value = contract_of(tx)
        .context("tx missing contract")?
        .get("parameter")
        .and_then(|p| p.get("value"))
        .context("tx missing contract parameter value")?;

    let owner_hex = value.get("owner_address").and_then(Value::as_str).context("missing owner_address")?;
    let to_hex = value.get("to_address").and_then(Value::as_str).context("missing to_address")?;
    let amount = value.get("amount").and_then(Value::as_u64).unwrap_or(0);

    Ok(ParsedTransfer {
        txid,
        symbol: "TRX".to_string(),
        src: TronAddress::from_hex41(owner_hex)?,
        dst: TronAddress::from_hex41(to_hex)?,
        amount_raw: amount as u128,
        is_trc20: false,
    })
}

/// Decodes every `Transfer` log in a `TriggerSmartContract` tx whose emitting contract is a
/// configured token. Returns one `ParsedTransfer` per matching log, in log order.
fn parse_trigger_smart_contract(
    txid: &str,
    tx_info: &Value,
    tokens: &std::collections::BTreeMap<String, gateway_core::config::TokenInfo>,
) -> Result<Vec<ParsedTransfer>> {
    let logs = tx_info.get("log").and_then(Value::as_array);
    let Some(logs) = logs else {
        return Err(GatewayError::UnknownTransactionType.into());
    };

    let mut out = Vec::new();
    for log in logs {
        let addr_hex = log.get("address").and_then(Value::as_str).unwrap_or_default();
        let prefixed_hex = format!("41{addr_hex}");
        let contract_addr = match TronAddress::from_hex41(&prefixed_hex) {
            Ok(a) => a,
            Err(_) => continue,
        };

        let Some(token) = tokens.get(&contract_addr.to_base58check()) else {
            continue;
        };

        let topics: Vec<String> = log
            .get("topics")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let data_hex = log.get("data").and_then(Value::as_str).unwrap_or_default();

        match decode_transfer_log(&topics, data_hex) {
            Ok(transfer) => out.push(ParsedTransfer {
                txid: txid.to_string(),
                symbol: token.symbol.clone(),
                src: transfer.from,
                dst: transfer.to,
                amount_raw: transfer.amount,
                is_trc20: true,
            }),
            // The log matched the Transfer event shape but its payload was malformed: this skips
            // the whole tx (spec §4.3), not just this log, so the typed error must propagate.
            Err(e)
                if e.downcast_ref::<tron::events::InsufficientDataBytes>().is_some()
                    || e.downcast_ref::<tron::events::NonEmptyPaddingBytes>().is_some() =>
            {
                return Err(e);
            }
            Err(_) => continue,
        }
    }

    if out.is_empty() {
        return Err(GatewayError::UnknownTransactionType.into());
    }
    Ok(out)
}

/// Parses one on-chain transaction into zero or more transfers. A non-`SUCCESS` contract result
/// is a `BadContractResult` and is skipped per-tx; unrecognized types are `UnknownTransactionType`.
/// `tx_infos` is the block's per-tx info map, already downloaded in bulk by `scan_block`.
fn parse_tx(ctx: &GatewayContext, tx: &Value, tx_infos: &HashMap<String, Value>) -> Result<Vec<ParsedTransfer>> {
    if !contract_succeeded(tx) {
        return Err(GatewayError::BadContractResult.into());
    }

    match contract_type(tx) {
        Some("TransferContract") => Ok(vec![parse_transfer_contract(tx)?]),
        Some("TriggerSmartContract") => {
            let txid = tx.get("txID").and_then(Value::as_str).context("tx missing txID")?;
            let info = tx_infos.get(txid).ok_or(GatewayError::UnknownTransactionType)?;
            parse_trigger_smart_contract(txid, info, &ctx.config.chain.tokens).map_err(remap_transfer_log_error)
        }
        _ => Err(GatewayError::UnknownTransactionType.into()),
    }
}

/// Maps the typed, downcastable errors from `tron::events::decode_transfer_log` onto the
/// `GatewayError` kinds `scan_block` matches on for per-tx skip vs. chunk failure.
fn remap_transfer_log_error(e: anyhow::Error) -> anyhow::Error {
    if e.downcast_ref::<tron::events::InsufficientDataBytes>().is_some() {
        return GatewayError::InsufficientDataBytes.into();
    }
    if e.downcast_ref::<tron::events::NonEmptyPaddingBytes>().is_some() {
        return GatewayError::NonEmptyPaddingBytes.into();
    }
    e
}

/// Applies the routing rules in spec §4.3.2 to one derived transfer: notifies Keeper, records
/// AML state, and dispatches sweeps, but never for the gateway's own outbound fee top-ups.
async fn route_transfer(ctx: &Arc<GatewayContext>, transfer: &ParsedTransfer) -> Result<()> {
    let treasury = ctx
        .keys
        .get_by_type("_", gateway_core::db::keys::KeyType::FeeDeposit)
        .await?
        .map(|k| k.public);

    let dst_b58 = transfer.dst.to_base58check();
    let src_b58 = transfer.src.to_base58check();

    if !transfer.is_trc20 && treasury.as_deref() == Some(src_b58.as_str()) && ctx.watched.contains(&dst_b58) {
        // Self fee top-up: this is our own outbound maintenance transfer, not a deposit.
        if ctx.config.aml.enabled() {
            gateway_core::aml::observe_fee_topup(&ctx.aml, &transfer.txid, &transfer.symbol, transfer.amount_raw as u64, &dst_b58)
                .await
                .ok();
        }
        return Ok(());
    }

    if !ctx.watched.contains(&dst_b58) {
        return Ok(());
    }

    ctx.keeper.walletnotify(&transfer.symbol, &transfer.txid).await?;
    ctx.telemetry.notification_sent(&transfer.symbol);

    let is_external_source = treasury.as_deref() != Some(src_b58.as_str()) && !ctx.watched.contains(&src_b58);

    if ctx.config.aml.enabled() && is_external_source {
        gateway_core::aml::observe_transfer(
            &ctx.aml,
            &ctx.config.aml,
            &transfer.txid,
            &transfer.symbol,
            transfer.amount_raw as u64,
            &dst_b58,
            None,
        )
        .await?;
        ctx.telemetry.aml_transaction_recorded();

        let ctx2 = ctx.clone();
        let tx_id = transfer.txid.clone();
        let wait = Duration::from_secs(ctx.config.aml.wait_before_api_call_secs);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Err(e) = gateway_core::sweep::run_aml_payout_for_tx(&ctx2, &tx_id).await {
                tracing::warn!(error = %e, tx_id, "aml payout dispatch failed");
            }
        });
    } else {
        let dedup_key = if transfer.is_trc20 {
            gateway_core::jobs::JobKey::SweepTrc20 { address: dst_b58.clone(), symbol: transfer.symbol.clone() }
        } else {
            gateway_core::jobs::JobKey::SweepTrx { address: dst_b58.clone() }
        };
        let ctx2 = ctx.clone();
        let dst = dst_b58.clone();
        let symbol = transfer.symbol.clone();
        let jobs = ctx.jobs.clone();
        tokio::spawn(async move {
            jobs.run_dedup(dedup_key, || async move { gateway_core::sweep::run_sweep(&ctx2, &dst, &symbol).await })
                .await;
        });
    }

    Ok(())
}

/// Scans a single block: fetches it (and its per-tx info map), parses every tx, routes every
/// derived transfer. Returns `Ok(())` on success; any error here fails the whole enclosing chunk
/// (spec §4.3 step 5).
async fn scan_block(ctx: &Arc<GatewayContext>, height: u64, cache: &ChunkCache) -> Result<()> {
    let client = ctx.connections.client().await?;
    let block = cache.block(&client, height).await?;

    let transactions = block.get("transactions").and_then(Value::as_array).cloned().unwrap_or_default();
    if transactions.is_empty() {
        return Ok(());
    }

    let tx_infos = cache.tx_info_map(&client, height).await?;

    for tx in &transactions {
        let transfers = match parse_tx(ctx, tx, &tx_infos) {
            Ok(t) => t,
            Err(e) => {
                match e.downcast_ref::<GatewayError>() {
                    Some(GatewayError::UnknownTransactionType | GatewayError::BadContractResult | GatewayError::InsufficientDataBytes) => {
                        tracing::debug!(error = %e, block = height, "skipping tx");
                        continue;
                    }
                    Some(GatewayError::NonEmptyPaddingBytes) => {
                        tracing::warn!(error = %e, block = height, "skipping tx with malformed transfer log data");
                        continue;
                    }
                    _ => return Err(e),
                }
            }
        };

        for transfer in &transfers {
            route_transfer(ctx, transfer).await?;
        }
    }

    Ok(())
}

/// Chunked tail-follower with exactly-once-per-chunk commit semantics (spec §4.3). A rewind in
/// the reported chain head is treated as fatal; this gateway trusts the currently elected node
/// and does not attempt reorg detection (see DESIGN.md).
pub async fn run_block_scanner(ctx: Arc<GatewayContext>, shutdown: CancellationToken) -> Result<()> {
    ctx.connections.elect_initial().await?;

    let mut backoff = Duration::from_millis(250);

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        match scan_once(&ctx, &shutdown).await {
            Ok(()) => {
                backoff = Duration::from_millis(250);
            }
            Err(e) => {
                tracing::error!(error = %e, "block scanner chunk failed, retrying");
                ctx.telemetry.block_failed();
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {},
                    _ = shutdown.cancelled() => return Ok(()),
                }
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
        }
    }
}

async fn scan_once(ctx: &Arc<GatewayContext>, shutdown: &CancellationToken) -> Result<()> {
    let client = ctx.connections.client().await?;

    let last = match ctx.settings.get_u64(LAST_SEEN_BLOCK_NUM).await? {
        Some(n) => n,
        None => {
            let head = current_head(&client).await?;
            ctx.settings.set_u64(LAST_SEEN_BLOCK_NUM, ctx.config.scanner.last_block_num_hint.unwrap_or(head)).await?;
            return Ok(());
        }
    };

    let head = current_head(&client).await?;
    if head < last {
        anyhow::bail!("chain head {head} regressed below last_seen_block_num {last}");
    }
    if head == last {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(ctx.config.scanner.interval_time_secs)) => {},
            _ = shutdown.cancelled() => {},
        }
        return Ok(());
    }

    let end = (last + u64::from(ctx.config.scanner.max_block_chunk_size)).min(head);
    let start = last + 1;

    if shutdown.is_cancelled() {
        return Ok(());
    }

    let chunk_size = (end - start + 1) as usize;
    let cache = Arc::new(ChunkCache::new(chunk_size));
    let concurrency = (ctx.config.scanner.max_block_chunk_size as usize).max(1);

    // Submit scan(blockN) across a bounded worker pool (spec §4.3 step 4); commit only once every
    // block in the chunk reports success (step 5), so mid-chunk cancellation is not attempted here
    // beyond the check above (see the concurrency-model note in DESIGN.md).
    let results: Vec<Result<()>> = stream::iter(start..=end)
        .map(|height| {
            let ctx = ctx.clone();
            let cache = cache.clone();
            async move { scan_block(&ctx, height, &cache).await.with_context(|| format!("scanning block {height}")) }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut scanned = 0usize;
    for r in results {
        match r {
            Ok(()) => scanned += 1,
            Err(e) => return Err(e),
        }
    }
    for _ in 0..scanned {
        ctx.telemetry.block_scanned();
    }

    ctx.settings.set_u64(LAST_SEEN_BLOCK_NUM, end).await?;
    tracing::info!(from = start, to = end, head, "chunk committed");
    Ok(())
}

async fn current_head(client: &tron::ChainClient) -> Result<u64> {
    let block = client.now_block().await?;
    block
        .get("block_header")
        .and_then(|h| h.get("raw_data"))
        .and_then(|r| r.get("number"))
        .and_then(Value::as_u64)
        .context("now_block response missing block number")
}

pub async fn run_connection_refresher(ctx: Arc<GatewayContext>, shutdown: CancellationToken) -> Result<()> {
    let period = Duration::from_secs(30);
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match ctx.connections.refresh_best_server().await {
            Ok(changed) if changed => tracing::info!("switched to a new best full node"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not refresh best server"),
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {},
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

pub async fn run_scanner_stats(ctx: Arc<GatewayContext>, shutdown: CancellationToken) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        if let Ok(Some(last)) = ctx.settings.get_u64(LAST_SEEN_BLOCK_NUM).await {
            tracing::info!(last_seen_block_num = last, watched = ctx.watched.len(), "scanner progress");
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(ctx.config.scanner.stats_log_period_secs)) => {},
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}
