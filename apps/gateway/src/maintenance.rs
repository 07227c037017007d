use gateway_core::GatewayContext;
use gateway_core::db::keys::KeyType;
use gateway_core::sweep::load_wallet;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tron::TronAddress;

/// Daily maintenance job, grounded on `original_source/app/tasks.py::transfer_unused_fee`: sweeps
/// the full native balance of every `onetime` account back to the treasury. Distinct from the
/// AML `sweep_accounts` recovery job — this one runs once a day regardless of AML configuration
/// and targets leftover TRX rather than interrupted payouts.
pub async fn run_daily_fee_reclaim(ctx: Arc<GatewayContext>, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        if let Err(e) = reclaim_unused_fee_once(&ctx).await {
            tracing::warn!(error = %e, "daily fee reclaim pass failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(24 * 60 * 60)) => {},
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn reclaim_unused_fee_once(ctx: &Arc<GatewayContext>) -> anyhow::Result<()> {
    let Some(treasury) = ctx.keys.get_by_type("_", KeyType::FeeDeposit).await? else {
        return Ok(());
    };
    let treasury_addr = TronAddress::from_base58check(&treasury.public)?;
    let client = ctx.connections.client().await?;

    let mut reclaimed = 0usize;
    for key in ctx.keys.list_by_type("_", KeyType::Onetime).await? {
        let Ok(address) = TronAddress::from_base58check(&key.public) else { continue };
        let balance = match client.account(address).await {
            Ok(account) => account.get("balance").and_then(Value::as_u64).unwrap_or(0),
            Err(e) => {
                tracing::debug!(error = %e, address = %key.public, "balance lookup failed during fee reclaim");
                continue;
            }
        };
        if balance == 0 {
            continue;
        }

        if let Err(e) = send_full_balance(ctx, &client, &key.public, address, treasury_addr, balance).await {
            tracing::warn!(error = %e, address = %key.public, "fee reclaim transfer failed");
            continue;
        }
        reclaimed += 1;
    }

    if reclaimed > 0 {
        tracing::info!(reclaimed, "daily fee reclaim swept unused balances back to treasury");
    }
    Ok(())
}

async fn send_full_balance(
    ctx: &GatewayContext,
    client: &tron::ChainClient,
    public: &str,
    from: TronAddress,
    to: TronAddress,
    amount: u64,
) -> anyhow::Result<()> {
    let wallet = load_wallet(ctx, public).await?;
    let unsigned = client.create_transaction(from, to, amount).await?;
    let signed = wallet.sign(unsigned)?;
    client.broadcast_transaction(signed.tx).await?;
    Ok(())
}
