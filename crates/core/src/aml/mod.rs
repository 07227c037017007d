use crate::config::{AmlConfig, DrainConfig, ScoreIntervalSplit, SplitEntry};
use crate::db::aml::{AmlPayout, AmlStatus, AmlStore, AmlTransaction, AmlTxType};
use anyhow::{Context, Result, bail};

/// Result of one poll against the external AML scoring API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Settled(f64),
    StillPending,
}

/// Polls the configured AML API for `tx`'s risk score, grounded on the scanner's HTTP client
/// pattern. The API is expected to return `{"finished": bool, "score": f64}`; `finished=false`
/// maps to `StillPending` and drives the `pending -> rechecking` retry loop (spec §4.6).
pub async fn fetch_score(cfg: &AmlConfig, tx: &AmlTransaction) -> Result<Score> {
    let base = cfg.api_url.as_deref().context("AML API URL is not configured")?;
    let http = reqwest::Client::new();
    let mut req = http.get(format!("{}/check", base.trim_end_matches('/'))).query(&[
        ("tx_id", tx.tx_id.as_str()),
        ("address", tx.address.as_str()),
        ("crypto", tx.crypto.as_str()),
    ]);
    if let Some(key) = &cfg.api_key {
        req = req.header("Authorization", format!("Bearer {key}"));
    }
    let body: serde_json::Value = req.send().await.context("calling AML API")?.json().await.context("parsing AML API response")?;

    if body.get("finished").and_then(serde_json::Value::as_bool) == Some(false) {
        return Ok(Score::StillPending);
    }
    let score = body.get("score").and_then(serde_json::Value::as_f64).context("AML API response missing score")?;
    Ok(Score::Settled(score))
}

/// A planned outbound leg of a split payout, not yet persisted or sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSplit {
    pub address: String,
    pub amount: u64,
}

/// Observes an inbound transfer destined for a watched address. Below `min_check_amount`, the
/// transaction skips risk scoring entirely (`status=ready, score=1`); otherwise it starts in
/// `pending` awaiting a score (spec §4.6 state machine).
pub async fn observe_transfer(
    store: &AmlStore,
    cfg: &AmlConfig,
    tx_id: &str,
    crypto: &str,
    amount_sun: u64,
    address: &str,
    uid: Option<&str>,
) -> Result<()> {
    let (status, score) = if amount_sun < cfg.min_check_amount_sun {
        (AmlStatus::Ready, 1.0)
    } else {
        (AmlStatus::Pending, -1.0)
    };

    store
        .insert(&AmlTransaction {
            tx_id: tx_id.to_string(),
            status,
            ttype: AmlTxType::Aml,
            score,
            crypto: crypto.to_string(),
            amount: amount_sun.to_string(),
            address: address.to_string(),
            uid: uid.map(str::to_string),
        })
        .await
}

/// Records an internal fee top-up (treasury -> onetime) so the scanner's self-send ignore rule
/// has a durable trace distinguishable from customer deposits (spec §4.3.2).
pub async fn observe_fee_topup(store: &AmlStore, tx_id: &str, crypto: &str, amount_sun: u64, address: &str) -> Result<()> {
    store
        .insert(&AmlTransaction {
            tx_id: tx_id.to_string(),
            status: AmlStatus::Skipped,
            ttype: AmlTxType::FromFee,
            score: -1.0,
            crypto: crypto.to_string(),
            amount: amount_sun.to_string(),
            address: address.to_string(),
            uid: None,
        })
        .await
}

/// Applies an AML API result. `None` score means "still pending" and transitions to
/// `rechecking`; `Some(score)` settles the transaction to `ready`.
pub async fn apply_score_result(store: &AmlStore, tx_id: &str, score: Option<f64>) -> Result<()> {
    match score {
        Some(score) => store.set_status(tx_id, AmlStatus::Ready, Some(score)).await,
        None => store.set_status(tx_id, AmlStatus::Rechecking, None).await,
    }
}

fn split_for_score(entries: &[ScoreIntervalSplit], score: f64) -> Option<&[SplitEntry]> {
    entries
        .iter()
        .find(|e| score >= e.min_score && score <= e.max_score)
        .map(|e| e.split.as_slice())
}

/// Splits `amount` across `split` by ratio, with the last entry absorbing the rounding residual
/// so the sum is exactly `amount` (spec testable property #7).
fn split_amount(amount: u64, split: &[SplitEntry]) -> Result<Vec<PlannedSplit>> {
    if split.is_empty() {
        bail!("split has no entries");
    }
    let ratio_sum: f64 = split.iter().map(|e| e.ratio).sum();
    if (ratio_sum - 1.0).abs() > 1e-6 {
        bail!("split ratios sum to {ratio_sum}, want 1.0");
    }

    let mut out = Vec::with_capacity(split.len());
    let mut allocated = 0u64;
    for entry in &split[..split.len() - 1] {
        let share = ((amount as f64) * entry.ratio).round() as u64;
        allocated += share;
        out.push(PlannedSplit { address: entry.address.clone(), amount: share });
    }
    let last = &split[split.len() - 1];
    out.push(PlannedSplit { address: last.address.clone(), amount: amount.saturating_sub(allocated) });
    Ok(out)
}

/// Builds the outbound payout list for a settled AML transaction, filtering out destinations
/// that already have a committed Payout row so reruns of the same `(tx_id, symbol)` are a no-op
/// (spec testable property #10).
pub async fn build_payout_list(store: &AmlStore, cfg: &AmlConfig, tx: &AmlTransaction) -> Result<Vec<PlannedSplit>> {
    if tx.status != AmlStatus::Ready {
        return Ok(Vec::new());
    }

    let amount: u64 = tx.amount.parse().context("parsing aml transaction amount")?;

    let split = match &cfg.drain {
        DrainConfig::Disabled => bail!("AML drain is disabled"),
        DrainConfig::Enabled { symbols } => {
            let crypto_cfg = symbols
                .get(&tx.crypto)
                .with_context(|| format!("no AML config for symbol {}", tx.crypto))?;
            if tx.score >= 0.0 {
                split_for_score(&crypto_cfg.risk_split, tx.score)
                    .map(|s| s.to_vec())
                    .unwrap_or_else(|| crypto_cfg.regular_split.clone())
            } else {
                crypto_cfg.regular_split.clone()
            }
        }
    };

    let planned = split_amount(amount, &split)?;

    let already = store.payouts_for_tx(&tx.tx_id).await?;
    let covered: std::collections::HashSet<&str> = already.iter().map(|p| p.address.as_str()).collect();

    Ok(planned.into_iter().filter(|p| !covered.contains(p.address.as_str())).collect())
}

/// Persists a planned split as a pending `AmlPayout` row prior to execution.
pub async fn record_planned_payout(store: &AmlStore, tx_id: &str, crypto: &str, planned: &PlannedSplit) -> Result<i64> {
    store
        .insert_payout(&AmlPayout {
            id: 0,
            tx_id: tx_id.to_string(),
            external_tx_id: None,
            address: planned.address.clone(),
            crypto: crypto.to_string(),
            amount_calc: planned.amount.to_string(),
            amount_send: planned.amount.to_string(),
            status: "pending".to_string(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_amount_conserves_total_with_rounding_residual_on_last() {
        let split = vec![
            SplitEntry { address: "a".into(), ratio: 1.0 / 3.0 },
            SplitEntry { address: "b".into(), ratio: 1.0 / 3.0 },
            SplitEntry { address: "c".into(), ratio: 1.0 / 3.0 },
        ];
        let planned = split_amount(100, &split).unwrap();
        assert_eq!(planned.iter().map(|p| p.amount).sum::<u64>(), 100);
    }

    #[test]
    fn split_amount_rejects_bad_ratios() {
        let split = vec![SplitEntry { address: "a".into(), ratio: 0.5 }];
        assert!(split_amount(100, &split).is_err());
    }

    #[test]
    fn score_interval_lookup_picks_matching_bucket() {
        let entries = vec![
            ScoreIntervalSplit {
                min_score: 0.0,
                max_score: 0.5,
                split: vec![SplitEntry { address: "low".into(), ratio: 1.0 }],
            },
            ScoreIntervalSplit {
                min_score: 0.5,
                max_score: 1.0,
                split: vec![SplitEntry { address: "high".into(), ratio: 1.0 }],
            },
        ];
        let picked = split_for_score(&entries, 0.7).unwrap();
        assert_eq!(picked[0].address, "high");
    }
}
