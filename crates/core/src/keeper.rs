use crate::error::GatewayError;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Client for the outbound webhook contract toward Keeper (the accounting backend this gateway
/// serves). Keeper is trusted to be idempotent on `(symbol, txid)` (spec §4.3.3).
#[derive(Clone)]
pub struct KeeperClient {
    http: reqwest::Client,
    host: String,
    backend_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutResultRow {
    pub status: String,
    pub txids: Vec<String>,
    pub details: Value,
    pub message: Option<String>,
}

impl KeeperClient {
    pub fn new(host: String, backend_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building keeper http client")?;
        Ok(Self { http, host, backend_key })
    }

    /// `POST /api/v1/walletnotify/{symbol}/{txid}`. A non-success response is fatal to the
    /// enclosing block (spec §4.3.2), so this returns a typed error rather than retrying itself.
    pub async fn walletnotify(&self, symbol: &str, txid: &str) -> Result<()> {
        let url = format!("{}/api/v1/walletnotify/{symbol}/{txid}", self.host.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .header("X-Shkeeper-Backend-Key", &self.backend_key)
            .send()
            .await
            .with_context(|| format!("posting walletnotify to {url}"))?;

        if !resp.status().is_success() {
            return Err(GatewayError::NotificationFailed(format!("{} returned {}", url, resp.status())).into());
        }
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if body.get("status").and_then(Value::as_str) != Some("success") {
            return Err(GatewayError::NotificationFailed(format!("unexpected body: {body}")).into());
        }
        Ok(())
    }

    /// `POST /api/v1/payoutnotify/{symbol}`, retried forever with exponential backoff capped at
    /// 10 seconds (spec §4.5) — Keeper must dedupe.
    pub async fn payoutnotify_with_infinite_retry(&self, symbol: &str, rows: &[PayoutResultRow]) {
        let url = format!("{}/api/v1/payoutnotify/{symbol}", self.host.trim_end_matches('/'));
        let mut backoff = Duration::from_secs(1);
        loop {
            let attempt = self
                .http
                .post(&url)
                .header("X-Shkeeper-Backend-Key", &self.backend_key)
                .json(rows)
                .send()
                .await;

            match attempt {
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), %url, "payoutnotify rejected, retrying");
                }
                Err(e) => {
                    tracing::warn!(error = %e, %url, "payoutnotify transport error, retrying");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(10));
        }
    }

    /// Polls `GET /api/v1/{symbol}/decrypt` until it returns a settled `persistent_status`.
    pub async fn poll_decrypt_until_settled(&self, symbol: &str) -> Result<DecryptStatus> {
        let url = format!("{}/api/v1/{symbol}/decrypt", self.host.trim_end_matches('/'));
        loop {
            let resp = self
                .http
                .get(&url)
                .header("X-Shkeeper-Backend-Key", &self.backend_key)
                .send()
                .await;

            if let Ok(resp) = resp {
                if let Ok(body) = resp.json::<Value>().await {
                    match body.get("persistent_status").and_then(Value::as_str) {
                        Some("disabled") => return Ok(DecryptStatus::Disabled),
                        Some("enabled") => {
                            let key = body
                                .get("key")
                                .and_then(Value::as_str)
                                .context("enabled decrypt response missing key")?
                                .to_string();
                            return Ok(DecryptStatus::Enabled { key });
                        }
                        _ => {}
                    }
                }
            }

            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

#[derive(Debug, Clone)]
pub enum DecryptStatus {
    Disabled,
    Enabled { key: String },
}
