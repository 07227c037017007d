use crate::error::GatewayError;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutRequest {
    pub dest: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutStep {
    pub src: String,
    pub dst: String,
    pub amount: u64,
}

/// Simplified planner: one step per request, signed by the sole funding account. Used when the
/// deployment has a single fee-deposit/funding wallet (spec §4.5).
pub fn plan_simple(requests: &[PayoutRequest], funding_account: &str) -> Vec<PayoutStep> {
    requests
        .iter()
        .map(|r| PayoutStep { src: funding_account.to_string(), dst: r.dest.clone(), amount: r.amount })
        .collect()
}

/// Richer multi-account planner, grounded on `original_source/app/trc20wallet.py::PayoutStrategy`:
/// for each payout, prefer a single account whose balance exactly matches; else if the sum of all
/// account balances exactly matches the total requested, drain every account; else greedily pull
/// from accounts in descending balance order until the amount is covered.
///
/// `balances` is consumed (drained) as steps are planned, so sequential payouts in one call never
/// double-spend the same funds.
pub fn plan_rich(requests: &[PayoutRequest], balances: &mut Vec<(String, u64)>) -> Result<Vec<PayoutStep>> {
    let mut steps = Vec::new();

    for req in requests {
        balances.sort_by(|a, b| b.1.cmp(&a.1));

        if let Some(pos) = balances.iter().position(|(_, bal)| *bal == req.amount) {
            let (account, bal) = balances.remove(pos);
            steps.push(PayoutStep { src: account, dst: req.dest.clone(), amount: bal });
            continue;
        }

        let total: u64 = balances.iter().map(|(_, b)| *b).sum();
        if total == req.amount && !balances.is_empty() {
            for (account, bal) in balances.drain(..) {
                steps.push(PayoutStep { src: account, dst: req.dest.clone(), amount: bal });
            }
            continue;
        }

        let mut remaining = req.amount;
        let mut consumed_indices = Vec::new();
        for (i, (_, bal)) in balances.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let take = (*bal).min(remaining);
            if take == 0 {
                continue;
            }
            remaining -= take;
            consumed_indices.push((i, take));
        }

        if remaining != 0 {
            return Err(GatewayError::Validation(format!(
                "insufficient balance to plan payout of {} to {}",
                req.amount, req.dest
            ))
            .into());
        }

        for (i, take) in consumed_indices.into_iter().rev() {
            let (account, bal) = &mut balances[i];
            steps.push(PayoutStep { src: account.clone(), dst: req.dest.clone(), amount: take });
            *bal -= take;
            if *bal == 0 {
                balances.remove(i);
            }
        }
    }

    Ok(steps)
}

/// Fee-seeding precondition (spec §4.5, testable property #8): refuses when the treasury can't
/// cover `signer_count * tx_fee`.
pub fn check_fee_seeding(treasury_balance_sun: u64, signer_count: usize, tx_fee_sun: u64) -> Result<()> {
    let required = tx_fee_sun.saturating_mul(signer_count as u64);
    if treasury_balance_sun < required {
        return Err(GatewayError::Validation(format!(
            "treasury balance {treasury_balance_sun} sun is insufficient to seed {signer_count} accounts at {tx_fee_sun} sun each"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_planner_is_1_to_1() {
        let reqs = vec![
            PayoutRequest { dest: "A".into(), amount: 10 },
            PayoutRequest { dest: "B".into(), amount: 20 },
        ];
        let steps = plan_simple(&reqs, "treasury");
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.src == "treasury"));
        assert_eq!(steps.iter().map(|s| s.amount).sum::<u64>(), 30);
    }

    #[test]
    fn rich_planner_prefers_exact_match() {
        let reqs = vec![PayoutRequest { dest: "A".into(), amount: 50 }];
        let mut balances = vec![("x".to_string(), 50), ("y".to_string(), 100)];
        let steps = plan_rich(&reqs, &mut balances).unwrap();
        assert_eq!(steps, vec![PayoutStep { src: "x".into(), dst: "A".into(), amount: 50 }]);
        assert_eq!(balances, vec![("y".to_string(), 100)]);
    }

    #[test]
    fn rich_planner_drains_all_on_exact_total_match() {
        let reqs = vec![PayoutRequest { dest: "A".into(), amount: 150 }];
        let mut balances = vec![("x".to_string(), 50), ("y".to_string(), 100)];
        let steps = plan_rich(&reqs, &mut balances).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps.iter().map(|s| s.amount).sum::<u64>(), 150);
        assert!(balances.is_empty());
    }

    #[test]
    fn rich_planner_greedily_accumulates_descending() {
        let reqs = vec![PayoutRequest { dest: "A".into(), amount: 120 }];
        let mut balances = vec![("x".to_string(), 30), ("y".to_string(), 100), ("z".to_string(), 40)];
        let steps = plan_rich(&reqs, &mut balances).unwrap();
        assert_eq!(steps.iter().map(|s| s.amount).sum::<u64>(), 120);
        // y (100) is consumed fully first (largest), then 20 more from the next-largest account.
        assert!(steps.iter().any(|s| s.src == "y" && s.amount == 100));
    }

    #[test]
    fn rich_planner_fails_when_insufficient() {
        let reqs = vec![PayoutRequest { dest: "A".into(), amount: 1000 }];
        let mut balances = vec![("x".to_string(), 10)];
        assert!(plan_rich(&reqs, &mut balances).is_err());
    }

    #[test]
    fn fee_seeding_precondition() {
        assert!(check_fee_seeding(100, 3, 30).is_err());
        assert!(check_fee_seeding(90, 3, 30).is_ok());
    }
}
