use crate::GatewayContext;
use crate::db::keys::KeyType;
use anyhow::{Context, Result, bail};
use k256::ecdsa::SigningKey;
use serde_json::Value;
use tron::resources;
use tron::{ChainClient, FeePolicy, TronAddress, TronWallet};

const TRC20_TRANSFER_SELECTOR: &str = "transfer(address,uint256)";
const TRC20_BALANCE_OF_SELECTOR: &str = "balanceOf(address)";

/// ABI-encodes a `(address,uint256)` call parameter, used by both the sweep and payout paths to
/// build `transfer(address,uint256)` calldata.
pub fn encode_address_uint256_param(to: TronAddress, amount: u128) -> String {
    let mut out = String::with_capacity(128);
    out.push_str(&"0".repeat(24));
    out.push_str(&hex::encode(&to.prefixed_bytes()[1..]));
    out.push_str(&format!("{amount:064x}"));
    out
}

fn encode_address_param(addr: TronAddress) -> String {
    let mut out = "0".repeat(24);
    out.push_str(&hex::encode(&addr.prefixed_bytes()[1..]));
    out
}

fn decode_uint256_result(result: &Value) -> Result<u128> {
    let hex_str = result
        .get("constant_result")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .context("trigger_constant_contract missing constant_result")?;
    let bytes = hex::decode(hex_str).context("constant_result is not hex")?;
    if bytes.len() < 32 {
        bail!("constant_result too short");
    }
    let tail = &bytes[bytes.len() - 16..];
    Ok(u128::from_be_bytes(tail.try_into().unwrap()))
}

/// Decrypts and loads the signing wallet for a key already on file, by its public (base58check)
/// address. Shared by the sweep, AML payout, and multi-payout executor paths.
pub async fn load_wallet(ctx: &GatewayContext, address: &str) -> Result<TronWallet> {
    let record = ctx
        .keys
        .get_by_public(address)
        .await?
        .with_context(|| format!("no key record for {address}"))?;
    let ciphertext = record
        .private
        .with_context(|| format!("{address} has no private material on this gateway"))?;
    let hex_key = ctx.encryption.decrypt(&ciphertext)?;
    let bytes = hex::decode(&hex_key).context("decrypted private key is not hex")?;
    let key = SigningKey::from_slice(&bytes).context("decrypted private key is not a valid secp256k1 scalar")?;
    Ok(TronWallet::from_signing_key(key))
}

async fn native_balance_sun(client: &ChainClient, address: TronAddress) -> Result<u64> {
    let account = client.account(address).await?;
    Ok(account.get("balance").and_then(Value::as_u64).unwrap_or(0))
}

async fn trc20_balance_raw(client: &ChainClient, contract: TronAddress, owner: TronAddress) -> Result<u128> {
    let param = encode_address_param(owner);
    let result = client
        .trigger_constant_contract(owner, contract, TRC20_BALANCE_OF_SELECTOR, &param)
        .await?;
    decode_uint256_result(&result)
}

/// Current balance of `address` in `symbol`, in raw chain units (sun for TRX, token units
/// otherwise). Used by the `sweep_accounts` recovery runner to find onetime accounts still
/// holding funds.
pub async fn balance_for_symbol(ctx: &GatewayContext, client: &ChainClient, address: TronAddress, symbol: &str) -> Result<u128> {
    if symbol.eq_ignore_ascii_case("TRX") {
        Ok(u128::from(native_balance_sun(client, address).await?))
    } else {
        let (contract_b58, _) = ctx
            .config
            .chain
            .tokens
            .iter()
            .find(|(_, t)| t.symbol.eq_ignore_ascii_case(symbol))
            .with_context(|| format!("no configured token contract for symbol {symbol}"))?;
        let contract = TronAddress::from_base58check(contract_b58)?;
        trc20_balance_raw(client, contract, address).await
    }
}

/// 20% headroom over the `triggerconstantcontract` energy estimate, capped at the configured
/// fee limit; real energy use can exceed a dry-run estimate under contention.
const FEE_LIMIT_HEADROOM_PPM: u64 = 200_000;

fn fee_policy(ctx: &GatewayContext) -> FeePolicy {
    FeePolicy {
        fee_limit_cap_sun: ctx.config.fees.tx_fee_limit_sun,
        fee_limit_headroom_ppm: FEE_LIMIT_HEADROOM_PPM,
    }
}

/// Tops up `deposit` with enough TRX to cover one native transfer's bandwidth burn, from the
/// treasury (`fee_deposit`) key. Used in burn-TRX mode ahead of a TRC-20 sweep that needs energy.
async fn fund_deposit_with_internal_fee(ctx: &GatewayContext, client: &ChainClient, deposit: TronAddress) -> Result<()> {
    let treasury = load_wallet(ctx, &ctx.keys.get_by_type("_", KeyType::FeeDeposit).await?.context("no treasury key configured")?.public).await?;

    let unsigned = client
        .create_transaction(treasury.address, deposit, ctx.config.fees.internal_tx_fee_sun)
        .await
        .context("building internal fee top-up transaction")?;
    let signed = treasury.sign(unsigned)?;
    client.broadcast_transaction(signed.tx).await.context("broadcasting internal fee top-up")?;
    Ok(())
}

/// Delegates energy from the dedicated `energy` key to `deposit` so it can pay for a TRC-20
/// transfer's gas without holding its own TRX, per the energy-delegation redesign flag.
/// `needed_energy` is the real cost of the transfer being funded, from a `trigger_constant_contract`
/// dry-run of that exact call. Returns `true` if a fresh delegation was made (caller should
/// undelegate it once the funded transfer is done), `false` if `deposit` already had enough energy.
async fn delegate_energy_for_sweep(ctx: &GatewayContext, client: &ChainClient, deposit: TronAddress, needed_energy: u64) -> Result<bool> {
    let deposit_resources = resources::parse_account_resources(&client.account_resource(deposit).await?)?;
    if deposit_resources.energy_available() >= needed_energy {
        return Ok(false);
    }

    let energy_key = ctx
        .keys
        .get_by_type("_", KeyType::Energy)
        .await?
        .context("energy delegation mode enabled but no energy key configured")?;
    let energy_wallet = load_wallet(ctx, &energy_key.public).await?;

    let totals_msg = client.account_resource(energy_wallet.address).await?;
    let totals = resources::parse_energy_stake_totals(&totals_msg)?;

    let headroom_ppm = ctx.config.energy.factor_ppm.saturating_sub(1_000_000);
    let energy_with_headroom = needed_energy.saturating_mul(1_000_000 + headroom_ppm) / 1_000_000;
    let balance_sun = resources::trx_sun_for_energy_units(energy_with_headroom, totals);

    let unsigned = client
        .delegate_resource(energy_wallet.address, deposit, balance_sun, "ENERGY", ctx.config.energy.lock)
        .await
        .context("building delegateresource transaction")?;
    let signed = energy_wallet.sign(unsigned)?;
    client.broadcast_transaction(signed.tx).await.context("broadcasting delegateresource")?;

    let after = resources::parse_account_resources(&client.account_resource(deposit).await?)?;
    if after.energy_available() < needed_energy {
        bail!("delegated energy still insufficient for transfer after delegateresource");
    }
    Ok(true)
}

/// Returns energy delegated from the `energy` key to `deposit` back to the delegator, reading the
/// real delegated amount from the chain rather than recomputing it locally.
async fn undelegate_energy_for_sweep(ctx: &GatewayContext, client: &ChainClient, deposit: TronAddress) -> Result<()> {
    let energy_key = ctx
        .keys
        .get_by_type("_", KeyType::Energy)
        .await?
        .context("energy delegation mode enabled but no energy key configured")?;
    let energy_wallet = load_wallet(ctx, &energy_key.public).await?;

    let delegated_msg = client.delegated_resource_v2(energy_wallet.address, deposit).await?;
    let balance_sun = resources::parse_delegated_energy_sun(&delegated_msg);
    if balance_sun == 0 {
        return Ok(());
    }

    let unsigned = client
        .undelegate_resource(energy_wallet.address, deposit, balance_sun, "ENERGY")
        .await
        .context("building undelegateresource transaction")?;
    let signed = energy_wallet.sign(unsigned)?;
    client.broadcast_transaction(signed.tx).await.context("broadcasting undelegateresource")?;
    Ok(())
}

/// Sweeps one watched address's balance in `symbol` to the treasury, per spec §4.4. `"TRX"`
/// sweeps native balance minus an estimated bandwidth-burn fee; any other symbol is treated as a
/// configured TRC-20 token and sweeps the full token balance, funding the transfer's gas either
/// by topping up TRX (burn mode) or by delegating energy (energy-delegation mode).
pub async fn run_sweep(ctx: &GatewayContext, address: &str, symbol: &str) -> Result<()> {
    let client = ctx.connections.client().await?;
    let deposit = TronAddress::from_base58check(address)?;
    let treasury_record = ctx.keys.get_by_type("_", KeyType::FeeDeposit).await?.context("no treasury key configured")?;
    let treasury = TronAddress::from_base58check(&treasury_record.public)?;

    let result = if symbol.eq_ignore_ascii_case("TRX") {
        sweep_native(ctx, &client, deposit, treasury).await
    } else {
        sweep_trc20(ctx, &client, deposit, treasury, symbol).await
    };

    match &result {
        Ok(()) => ctx.telemetry.sweep_executed(),
        Err(e) => {
            ctx.telemetry.sweep_error();
            tracing::warn!(error = %e, address, symbol, "sweep failed");
        }
    }
    result
}

async fn sweep_native(ctx: &GatewayContext, client: &ChainClient, deposit: TronAddress, treasury: TronAddress) -> Result<()> {
    let balance = native_balance_sun(client, deposit).await?;
    if balance < ctx.config.fees.trx_min_transfer_threshold_sun {
        tracing::debug!(balance, "native balance below sweep threshold, skipping");
        return Ok(());
    }

    let fee_estimate = ctx
        .config
        .fees
        .bandwidth_per_trx_transfer
        .saturating_mul(ctx.config.fees.trx_per_bandwidth_unit_sun);
    let amount = balance.saturating_sub(fee_estimate);
    if amount == 0 {
        return Ok(());
    }

    let wallet = load_wallet(ctx, &deposit.to_base58check()).await?;
    let unsigned = client.create_transaction(deposit, treasury, amount).await?;
    let signed = wallet.sign(unsigned)?;
    client.broadcast_transaction(signed.tx).await?;
    ctx.keys.mark_finished(&deposit.to_base58check()).await.ok();
    Ok(())
}

async fn sweep_trc20(ctx: &GatewayContext, client: &ChainClient, deposit: TronAddress, treasury: TronAddress, symbol: &str) -> Result<()> {
    let (contract_b58, token) = ctx
        .config
        .chain
        .tokens
        .iter()
        .find(|(_, t)| t.symbol.eq_ignore_ascii_case(symbol))
        .with_context(|| format!("no configured token contract for symbol {symbol}"))?;
    let contract = TronAddress::from_base58check(contract_b58)?;

    let balance = trc20_balance_raw(client, contract, deposit).await?;
    let threshold = ctx.config.fees.token_min_transfer_thresholds.get(&token.symbol).copied().unwrap_or(0);
    if balance < u128::from(threshold) || balance == 0 {
        tracing::debug!(balance, "token balance below sweep threshold, skipping");
        return Ok(());
    }

    let param = encode_address_uint256_param(treasury, balance);
    let estimate = client.trigger_constant_contract(deposit, contract, TRC20_TRANSFER_SELECTOR, &param).await?;
    let energy_used = estimate.get("energy_used").and_then(Value::as_u64).unwrap_or(65_000);

    let mut delegated = false;
    if ctx.config.energy.enabled {
        match delegate_energy_for_sweep(ctx, client, deposit, energy_used).await {
            Ok(d) => delegated = d,
            Err(e) if ctx.config.energy.allow_burn_fallback => {
                tracing::warn!(error = %e, "energy delegation failed, falling back to TRX fee top-up");
            }
            Err(e) => return Err(e),
        }
        if ctx.config.energy.allow_burn_fallback {
            let after = native_balance_sun(client, deposit).await?;
            if after < ctx.config.fees.internal_tx_fee_sun {
                fund_deposit_with_internal_fee(ctx, client, deposit).await?;
            }
        }
    } else {
        fund_deposit_with_internal_fee(ctx, client, deposit).await?;
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    }

    let wallet = load_wallet(ctx, &deposit.to_base58check()).await?;
    let fees = resources::parse_chain_fees(&client.chain_parameters().await?)?;
    let base_fee_limit = resources::quote_fee_limit_sun(energy_used, 300, fees);
    let fee_limit = fee_policy(ctx).apply(base_fee_limit);

    let unsigned = client
        .trigger_smart_contract(deposit, contract, TRC20_TRANSFER_SELECTOR, &param, 0, fee_limit)
        .await?;
    let signed = wallet.sign(unsigned)?;
    client.broadcast_transaction(signed.tx).await?;
    ctx.keys.mark_finished(&deposit.to_base58check()).await.ok();

    if delegated && !ctx.config.energy.lock {
        if let Err(e) = undelegate_energy_for_sweep(ctx, client, deposit).await {
            tracing::warn!(error = %e, "undelegating energy after sweep failed");
        }
    }
    Ok(())
}

/// Executes the split payout for one settled AML transaction (spec §4.6). Invoked from the
/// scanner after the configured wait period elapses following `observe_transfer`, and from the
/// gateway's periodic AML recheck runner when a `rechecking` row finally settles.
pub async fn run_aml_payout_for_tx(ctx: &GatewayContext, tx_id: &str) -> Result<()> {
    let Some(tx) = ctx.aml.get(tx_id).await? else {
        return Ok(());
    };

    if tx.status != crate::db::aml::AmlStatus::Ready {
        loop {
            match crate::aml::fetch_score(&ctx.config.aml, &tx).await {
                Ok(crate::aml::Score::Settled(score)) => {
                    crate::aml::apply_score_result(&ctx.aml, tx_id, Some(score)).await?;
                    break;
                }
                Ok(crate::aml::Score::StillPending) => {
                    crate::aml::apply_score_result(&ctx.aml, tx_id, None).await?;
                    tokio::time::sleep(std::time::Duration::from_secs(ctx.config.aml.result_update_period_secs)).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, tx_id, "aml score poll failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(ctx.config.aml.result_update_period_secs)).await;
                }
            }
        }
    }

    let tx = ctx.aml.get(tx_id).await?.context("aml transaction disappeared")?;
    let planned = crate::aml::build_payout_list(&ctx.aml, &ctx.config.aml, &tx).await?;
    if planned.is_empty() {
        return Ok(());
    }

    let client = ctx.connections.client().await?;
    let treasury_record = ctx.keys.get_by_type("_", KeyType::FeeDeposit).await?.context("no treasury key configured")?;
    let treasury_wallet = load_wallet(ctx, &treasury_record.public).await?;

    for split in &planned {
        crate::aml::record_planned_payout(&ctx.aml, tx_id, &tx.crypto, split).await?;
        let to = TronAddress::from_base58check(&split.address)?;

        let broadcast = if tx.crypto.eq_ignore_ascii_case("TRX") {
            let unsigned = client.create_transaction(treasury_wallet.address, to, split.amount).await?;
            let signed = treasury_wallet.sign(unsigned)?;
            client.broadcast_transaction(signed.tx).await?
        } else {
            let (contract_b58, _) = ctx
                .config
                .chain
                .tokens
                .iter()
                .find(|(_, t)| t.symbol.eq_ignore_ascii_case(&tx.crypto))
                .with_context(|| format!("no configured token contract for symbol {}", tx.crypto))?;
            let contract = TronAddress::from_base58check(contract_b58)?;
            let param = encode_address_uint256_param(to, split.amount as u128);
            let unsigned = client
                .trigger_smart_contract(treasury_wallet.address, contract, TRC20_TRANSFER_SELECTOR, &param, 0, ctx.config.fees.tx_fee_limit_sun)
                .await?;
            let signed = treasury_wallet.sign(unsigned)?;
            client.broadcast_transaction(signed.tx).await?
        };

        ctx.telemetry.payout_executed();
        tracing::info!(tx_id, dst = %split.address, amount = split.amount, result = %broadcast, "aml payout leg sent");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR_HEX: &str = "4154238dd381e08f6f5204a2b7847e5e19ac4cd5a8";

    #[test]
    fn encode_address_uint256_param_pads_to_two_32_byte_words() {
        let addr = TronAddress::from_hex41(ADDR_HEX).unwrap();
        let encoded = encode_address_uint256_param(addr, 1_000_000);

        assert_eq!(encoded.len(), 128);
        assert!(encoded[..24].chars().all(|c| c == '0'));
        assert_eq!(&encoded[24..64], "38dd381e08f6f5204a2b7847e5e19ac4cd5a8");
        assert_eq!(&encoded[64..], &format!("{:064x}", 1_000_000u128));
    }

    #[test]
    fn encode_address_param_pads_a_single_word() {
        let addr = TronAddress::from_hex41(ADDR_HEX).unwrap();
        let encoded = encode_address_param(addr);

        assert_eq!(encoded.len(), 64);
        assert!(encoded[..24].chars().all(|c| c == '0'));
        assert_eq!(&encoded[24..], "38dd381e08f6f5204a2b7847e5e19ac4cd5a8");
    }

    #[test]
    fn decode_uint256_result_reads_the_low_16_bytes() {
        let word = format!("{:064x}", 42_000u128);
        let result = json!({ "constant_result": [word] });

        assert_eq!(decode_uint256_result(&result).unwrap(), 42_000);
    }

    #[test]
    fn decode_uint256_result_rejects_missing_field() {
        let result = json!({});
        assert!(decode_uint256_result(&result).is_err());
    }

    #[test]
    fn decode_uint256_result_rejects_short_payload() {
        let result = json!({ "constant_result": ["00"] });
        assert!(decode_uint256_result(&result).is_err());
    }
}
