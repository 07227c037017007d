use crate::TronAddress;
use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Full-node HTTP JSON client. The Tron node's `/wallet/*` wire format is treated as opaque:
/// unsigned transactions returned by the node are forwarded to [`crate::sender`] as-is and
/// never decoded here.
///
/// Holds a sticky-preferred endpoint with fallback, mirroring how a multi-endpoint JSON-RPC
/// client behaves when one upstream starts erroring.
#[derive(Clone)]
pub struct ChainClient {
    urls: Arc<Vec<String>>,
    http: reqwest::Client,
    preferred: Arc<AtomicUsize>,
}

impl ChainClient {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            bail!("ChainClient requires at least one full-node url");
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            urls: Arc::new(urls),
            http,
            preferred: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn candidate_order(&self) -> Vec<usize> {
        let start = self.preferred.load(Ordering::Relaxed) % self.urls.len();
        (0..self.urls.len()).map(|i| (start + i) % self.urls.len()).collect()
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let mut last_err = None;
        for idx in self.candidate_order() {
            let url = format!("{}{}", self.urls[idx].trim_end_matches('/'), path);
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    match resp.json::<Value>().await {
                        Ok(v) if status.is_success() => {
                            self.preferred.store(idx, Ordering::Relaxed);
                            return Ok(v);
                        }
                        Ok(v) => {
                            last_err = Some(anyhow::anyhow!("{url} returned {status}: {v}"));
                        }
                        Err(e) => {
                            last_err = Some(anyhow::Error::new(e).context(format!("{url} body")));
                        }
                    }
                }
                Err(e) => {
                    last_err = Some(anyhow::Error::new(e).context(format!("request to {url}")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no full-node urls configured")))
    }

    pub async fn now_block(&self) -> Result<Value> {
        self.post("/wallet/getnowblock", json!({})).await
    }

    pub async fn block_by_num(&self, num: u64) -> Result<Value> {
        self.post("/wallet/getblockbynum", json!({ "num": num })).await
    }

    pub async fn transaction_info_by_id(&self, txid_hex: &str) -> Result<Value> {
        self.post("/wallet/gettransactioninfobyid", json!({ "value": txid_hex })).await
    }

    /// Bulk per-block transaction-info fetch (one RPC per block instead of one per tx). Returns
    /// the node's raw array; each entry that has a `log` field is a smart-contract call receipt.
    pub async fn transaction_info_by_block_num(&self, num: u64) -> Result<Value> {
        self.post("/wallet/gettransactioninfobyblocknum", json!({ "num": num })).await
    }

    /// Raw transaction (contract type, parameters, signatures) as opposed to
    /// [`Self::transaction_info_by_id`]'s post-execution receipt.
    pub async fn transaction_by_id(&self, txid_hex: &str) -> Result<Value> {
        self.post("/wallet/gettransactionbyid", json!({ "value": txid_hex })).await
    }

    pub async fn account(&self, address: TronAddress) -> Result<Value> {
        self.post(
            "/wallet/getaccount",
            json!({ "address": address.to_hex41(), "visible": false }),
        )
        .await
    }

    pub async fn account_resource(&self, address: TronAddress) -> Result<Value> {
        self.post(
            "/wallet/getaccountresource",
            json!({ "address": address.to_hex41(), "visible": false }),
        )
        .await
    }

    pub async fn chain_parameters(&self) -> Result<Value> {
        self.post("/wallet/getchainparameters", json!({})).await
    }

    /// Builds an unsigned `TransferContract` transaction (native TRX).
    pub async fn create_transaction(
        &self,
        owner: TronAddress,
        to: TronAddress,
        amount_sun: u64,
    ) -> Result<Value> {
        self.post(
            "/wallet/createtransaction",
            json!({
                "owner_address": owner.to_hex41(),
                "to_address": to.to_hex41(),
                "amount": amount_sun,
                "visible": false,
            }),
        )
        .await
    }

    /// Builds an unsigned `TriggerSmartContract` transaction. `fee_limit_sun` is applied by the
    /// node at build time, so no client-side varint resizing is needed.
    pub async fn trigger_smart_contract(
        &self,
        owner: TronAddress,
        contract: TronAddress,
        function_selector: &str,
        parameter_hex: &str,
        call_value_sun: u64,
        fee_limit_sun: u64,
    ) -> Result<Value> {
        self.post(
            "/wallet/triggersmartcontract",
            json!({
                "owner_address": owner.to_hex41(),
                "contract_address": contract.to_hex41(),
                "function_selector": function_selector,
                "parameter": parameter_hex,
                "call_value": call_value_sun,
                "fee_limit": fee_limit_sun,
                "visible": false,
            }),
        )
        .await
    }

    /// Dry-run estimate of a contract call, used to size `fee_limit` before signing for real.
    pub async fn trigger_constant_contract(
        &self,
        owner: TronAddress,
        contract: TronAddress,
        function_selector: &str,
        parameter_hex: &str,
    ) -> Result<Value> {
        self.post(
            "/wallet/triggerconstantcontract",
            json!({
                "owner_address": owner.to_hex41(),
                "contract_address": contract.to_hex41(),
                "function_selector": function_selector,
                "parameter": parameter_hex,
                "visible": false,
            }),
        )
        .await
    }

    pub async fn freeze_balance_v2(
        &self,
        owner: TronAddress,
        frozen_balance_sun: u64,
        resource: &str,
    ) -> Result<Value> {
        self.post(
            "/wallet/freezebalancev2",
            json!({
                "owner_address": owner.to_hex41(),
                "frozen_balance": frozen_balance_sun,
                "resource": resource,
                "visible": false,
            }),
        )
        .await
    }

    pub async fn delegate_resource(
        &self,
        owner: TronAddress,
        receiver: TronAddress,
        balance_sun: u64,
        resource: &str,
        lock: bool,
    ) -> Result<Value> {
        self.post(
            "/wallet/delegateresource",
            json!({
                "owner_address": owner.to_hex41(),
                "receiver_address": receiver.to_hex41(),
                "balance": balance_sun,
                "resource": resource,
                "lock": lock,
                "visible": false,
            }),
        )
        .await
    }

    /// Amount currently delegated from `from` to `to`, broken down by resource. Used to undelegate
    /// the real on-chain amount rather than a locally recomputed estimate.
    pub async fn delegated_resource_v2(&self, from: TronAddress, to: TronAddress) -> Result<Value> {
        self.post(
            "/wallet/getdelegatedresourcev2",
            json!({ "fromAddress": from.to_hex41(), "toAddress": to.to_hex41(), "visible": false }),
        )
        .await
    }

    pub async fn undelegate_resource(
        &self,
        owner: TronAddress,
        receiver: TronAddress,
        balance_sun: u64,
        resource: &str,
    ) -> Result<Value> {
        self.post(
            "/wallet/undelegateresource",
            json!({
                "owner_address": owner.to_hex41(),
                "receiver_address": receiver.to_hex41(),
                "balance": balance_sun,
                "resource": resource,
                "visible": false,
            }),
        )
        .await
    }

    pub async fn unfreeze_balance_v2(
        &self,
        owner: TronAddress,
        unfreeze_balance_sun: u64,
        resource: &str,
    ) -> Result<Value> {
        self.post(
            "/wallet/unfreezebalancev2",
            json!({
                "owner_address": owner.to_hex41(),
                "unfreeze_balance": unfreeze_balance_sun,
                "resource": resource,
                "visible": false,
            }),
        )
        .await
    }

    /// Claims TRX from already-expired (14-day-matured) unfreeze requests.
    pub async fn withdraw_expire_unfreeze(&self, owner: TronAddress) -> Result<Value> {
        self.post(
            "/wallet/withdrawexpireunfreeze",
            json!({ "owner_address": owner.to_hex41(), "visible": false }),
        )
        .await
    }

    /// Claims accrued voting/witness rewards for `owner`.
    pub async fn withdraw_balance(&self, owner: TronAddress) -> Result<Value> {
        self.post("/wallet/withdrawbalance", json!({ "owner_address": owner.to_hex41(), "visible": false })).await
    }

    pub async fn broadcast_transaction(&self, signed: Value) -> Result<Value> {
        self.post("/wallet/broadcasttransaction", signed).await
    }
}
