use gateway_core::GatewayContext;
use gateway_core::db::aml::AmlStatus;
use gateway_core::db::keys::KeyType;
use gateway_core::jobs::JobKey;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tron::TronAddress;

/// Re-dispatches the settle-and-payout loop for `tx_id`, deduped against any copy already running
/// (e.g. the one spawned inline by the scanner right after the transfer was observed).
async fn redispatch(ctx: &Arc<GatewayContext>, tx_id: String) {
    let ctx2 = ctx.clone();
    let jobs = ctx.jobs.clone();
    tokio::spawn(async move {
        jobs.run_dedup(JobKey::AmlPayout { tx_id: tx_id.clone() }, || async move {
            if let Err(e) = gateway_core::sweep::run_aml_payout_for_tx(&ctx2, &tx_id).await {
                tracing::warn!(error = %e, tx_id, "aml recheck payout dispatch failed");
            }
        })
        .await;
    });
}

/// AML recheck runner (spec §5, runner 4): periodically re-scans `pending`/`rechecking`
/// transactions and re-dispatches their settle-and-payout loop, covering the case where the
/// per-transaction task spawned at observation time died (e.g. process restart).
pub async fn run_aml_recheck(ctx: Arc<GatewayContext>, shutdown: CancellationToken) {
    if !ctx.config.aml.enabled() {
        return;
    }
    let period = Duration::from_secs(ctx.config.aml.result_update_period_secs);

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        for status in [AmlStatus::Pending, AmlStatus::Rechecking] {
            match ctx.aml.list_by_status(status).await {
                Ok(rows) => {
                    for tx in rows {
                        redispatch(&ctx, tx.tx_id).await;
                    }
                }
                Err(e) => tracing::warn!(error = %e, ?status, "listing aml transactions for recheck failed"),
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {},
            _ = shutdown.cancelled() => return,
        }
    }
}

/// `sweep_accounts` recovery runner (spec §4.6, §5 runner 5): scans every `onetime` account's
/// balance in every configured symbol and, for any balance above the sweep threshold,
/// re-dispatches every AML Transaction row tied to that address — a recovery path for payouts
/// interrupted between settling and sending.
pub async fn run_sweep_accounts(ctx: Arc<GatewayContext>, shutdown: CancellationToken) {
    if !ctx.config.aml.enabled() {
        return;
    }
    let period = Duration::from_secs(ctx.config.aml.sweep_accounts_period_secs);

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        if let Err(e) = sweep_accounts_once(&ctx).await {
            tracing::warn!(error = %e, "sweep_accounts pass failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {},
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn sweep_accounts_once(ctx: &Arc<GatewayContext>) -> anyhow::Result<()> {
    let client = ctx.connections.client().await?;
    let onetime = ctx.keys.list_by_type("_", KeyType::Onetime).await?;

    let mut symbols = vec!["TRX".to_string()];
    symbols.extend(ctx.config.chain.tokens.values().map(|t| t.symbol.clone()));

    for key in &onetime {
        let Ok(address) = TronAddress::from_base58check(&key.public) else { continue };

        for symbol in &symbols {
            let balance = match gateway_core::sweep::balance_for_symbol(ctx, &client, address, symbol).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::debug!(error = %e, address = %key.public, symbol, "balance lookup failed during sweep_accounts");
                    continue;
                }
            };
            let threshold = if symbol.eq_ignore_ascii_case("TRX") {
                u128::from(ctx.config.fees.trx_min_transfer_threshold_sun)
            } else {
                u128::from(ctx.config.fees.token_min_transfer_thresholds.get(symbol).copied().unwrap_or(0))
            };
            if balance == 0 || balance < threshold {
                continue;
            }

            match ctx.aml.list_by_address(&key.public).await {
                Ok(rows) => {
                    for tx in rows {
                        redispatch(ctx, tx.tx_id).await;
                    }
                }
                Err(e) => tracing::warn!(error = %e, address = %key.public, "listing aml transactions for sweep_accounts failed"),
            }
        }
    }

    Ok(())
}
