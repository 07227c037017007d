use anyhow::{Context, Result, bail};
use futures::stream::{self, StreamExt};
use gateway_core::GatewayContext;
use gateway_core::db::keys::KeyType;
use gateway_core::db::tasks::TaskStatus;
use gateway_core::jobs::{Dispatch, JobKey};
use gateway_core::keeper::PayoutResultRow;
use gateway_core::planner::{PayoutRequest, PayoutStep, check_fee_seeding, plan_simple};
use gateway_core::sweep::{encode_address_uint256_param, load_wallet};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tron::{ChainClient, TronAddress};

/// One submitted payout batch, queued by an HTTP handler and picked up by a pool worker.
pub struct PayoutJob {
    pub task_id: String,
    pub symbol: String,
    pub requests: Vec<PayoutRequest>,
}

pub type PayoutSender = mpsc::Sender<PayoutJob>;

/// Spawns the Payout Executor: a bounded worker pool draining a queue of [`PayoutJob`]s, with
/// at-most-one-inflight-per-task dedup via the shared [`gateway_core::jobs::JobScheduler`] and
/// infinite-retry notification to Keeper, per spec §4.5.
pub fn spawn(ctx: Arc<GatewayContext>, shutdown: CancellationToken) -> PayoutSender {
    let (tx, mut rx) = mpsc::channel::<PayoutJob>(256);
    let permits = Arc::new(Semaphore::new(ctx.config.jobs.concurrent_max_workers));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                job = rx.recv() => {
                    let Some(job) = job else { break };
                    let ctx = ctx.clone();
                    let permits = permits.clone();
                    tokio::spawn(async move {
                        let _permit = permits.acquire_owned().await.expect("semaphore never closed");
                        run_payout_job(&ctx, job).await;
                    });
                }
            }
        }
        tracing::info!("payout executor worker loop exiting");
    });

    tx
}

async fn run_payout_job(ctx: &Arc<GatewayContext>, job: PayoutJob) {
    let task_id = job.task_id.clone();
    let key = JobKey::Payout { request_id: task_id.clone() };

    let dispatch = ctx
        .jobs
        .run_dedup(key, || async { execute_payout(ctx, &job.symbol, &job.requests).await })
        .await;

    match dispatch {
        Dispatch::SkippedAlreadyRunning => {
            tracing::info!(task_id, "payout job skipped (already running)");
        }
        Dispatch::Ran(Ok(rows)) => {
            let result = json!(rows.iter().map(row_to_json).collect::<Vec<_>>());
            if let Err(e) = ctx.tasks.complete(&task_id, TaskStatus::Success, &result).await {
                tracing::warn!(error = %e, task_id, "failed to persist payout task result");
            }
            ctx.keeper.payoutnotify_with_infinite_retry(&job.symbol, &rows).await;
        }
        Dispatch::Ran(Err(e)) => {
            ctx.telemetry.payout_error();
            tracing::warn!(error = %e, task_id, "payout job failed");
            let result = json!({ "error": e.to_string() });
            if let Err(e) = ctx.tasks.complete(&task_id, TaskStatus::Failure, &result).await {
                tracing::warn!(error = %e, task_id, "failed to persist payout task failure");
            }
        }
    }
}

fn row_to_json(row: &PayoutResultRow) -> Value {
    json!({
        "status": row.status,
        "txids": row.txids,
        "details": row.details,
        "message": row.message,
    })
}

async fn execute_step(ctx: &GatewayContext, client: &ChainClient, symbol: &str, step: &PayoutStep) -> PayoutResultRow {
    let result = execute_step_inner(ctx, client, symbol, step).await;
    match result {
        Ok(txid) => PayoutResultRow { status: "success".to_string(), txids: vec![txid], details: json!(step), message: None },
        Err(e) => PayoutResultRow { status: "error".to_string(), txids: vec![], details: json!(step), message: Some(e.to_string()) },
    }
}

async fn execute_step_inner(ctx: &GatewayContext, client: &ChainClient, symbol: &str, step: &PayoutStep) -> Result<String> {
    let wallet = load_wallet(ctx, &step.src).await?;
    let to = TronAddress::from_base58check(&step.dst)?;

    let signed = if symbol.eq_ignore_ascii_case("TRX") {
        let unsigned = client.create_transaction(wallet.address, to, step.amount).await?;
        wallet.sign(unsigned)?
    } else {
        let (contract_b58, _) = ctx
            .config
            .chain
            .tokens
            .iter()
            .find(|(_, t)| t.symbol.eq_ignore_ascii_case(symbol))
            .with_context(|| format!("no configured token contract for symbol {symbol}"))?;
        let contract = TronAddress::from_base58check(contract_b58)?;
        let param = encode_address_uint256_param(to, step.amount as u128);
        let unsigned = client
            .trigger_smart_contract(wallet.address, contract, "transfer(address,uint256)", &param, 0, ctx.config.fees.tx_fee_limit_sun)
            .await?;
        wallet.sign(unsigned)?
    };

    client.broadcast_transaction(signed.tx).await?;
    let txid = hex::encode(signed.txid);
    wait_for_receipt_success(client, &txid).await?;
    Ok(txid)
}

/// Polls `transaction_info_by_id` until the broadcast tx reaches a terminal on-chain state.
/// `broadcast_transaction` only confirms the node accepted the tx for inclusion, not that it
/// executed successfully, so a reverted `TriggerSmartContract` call must still fail this check.
async fn wait_for_receipt_success(client: &ChainClient, txid_hex: &str) -> Result<()> {
    const MAX_ATTEMPTS: u32 = 20;
    const POLL_INTERVAL: Duration = Duration::from_secs(3);

    for _ in 0..MAX_ATTEMPTS {
        let info = client.transaction_info_by_id(txid_hex).await?;
        if info.get("id").and_then(Value::as_str).is_none() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        if let Some(top_result) = info.get("result").and_then(Value::as_str) {
            bail!("transaction {txid_hex} failed on-chain: {top_result}");
        }
        return match info.get("receipt").and_then(|r| r.get("result")).and_then(Value::as_str) {
            Some("SUCCESS") | None => Ok(()),
            Some(other) => bail!("transaction {txid_hex} reverted: {other}"),
        };
    }
    bail!("transaction {txid_hex} did not confirm within {MAX_ATTEMPTS} polls")
}

/// Plans and executes one payout batch: single funding account (the treasury) per the simplified
/// planner, fee-seeding precondition first, then each step fanned out over a bounded worker pool
/// (spec §4.5's `CONCURRENT_MAX_WORKERS`, distinct from the whole-job semaphore in [`spawn`]).
async fn execute_payout(ctx: &GatewayContext, symbol: &str, requests: &[PayoutRequest]) -> Result<Vec<PayoutResultRow>> {
    let client = ctx.connections.client().await?;
    let treasury = ctx.keys.get_by_type("_", KeyType::FeeDeposit).await?.context("no treasury key configured")?;
    let treasury_addr = TronAddress::from_base58check(&treasury.public)?;

    let treasury_balance = client.account(treasury_addr).await?.get("balance").and_then(Value::as_u64).unwrap_or(0);
    check_fee_seeding(treasury_balance, 1, ctx.config.fees.tx_fee_sun)?;

    let steps = plan_simple(requests, &treasury.public);

    let rows: Vec<PayoutResultRow> = stream::iter(steps.iter())
        .map(|step| {
            let client = client.clone();
            async move {
                let row = execute_step(ctx, &client, symbol, step).await;
                if row.status == "success" {
                    ctx.telemetry.payout_executed();
                } else {
                    ctx.telemetry.payout_error();
                }
                row
            }
        })
        .buffered(ctx.config.jobs.payout_step_workers)
        .collect()
        .await;
    Ok(rows)
}
