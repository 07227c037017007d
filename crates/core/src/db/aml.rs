use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmlStatus {
    Pending,
    Rechecking,
    Ready,
    Skipped,
}

impl AmlStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AmlStatus::Pending => "pending",
            AmlStatus::Rechecking => "rechecking",
            AmlStatus::Ready => "ready",
            AmlStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => AmlStatus::Pending,
            "rechecking" => AmlStatus::Rechecking,
            "ready" => AmlStatus::Ready,
            "skipped" => AmlStatus::Skipped,
            other => bail!("unknown aml status {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmlTxType {
    Aml,
    Regular,
    FromFee,
}

impl AmlTxType {
    pub fn as_str(self) -> &'static str {
        match self {
            AmlTxType::Aml => "aml",
            AmlTxType::Regular => "regular",
            AmlTxType::FromFee => "from_fee",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "aml" => AmlTxType::Aml,
            "regular" => AmlTxType::Regular,
            "from_fee" => AmlTxType::FromFee,
            other => bail!("unknown aml tx type {other}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AmlTransaction {
    pub tx_id: String,
    pub status: AmlStatus,
    pub ttype: AmlTxType,
    pub score: f64,
    pub crypto: String,
    pub amount: String,
    pub address: String,
    pub uid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AmlPayout {
    pub id: i64,
    pub tx_id: String,
    pub external_tx_id: Option<String>,
    pub address: String,
    pub crypto: String,
    pub amount_calc: String,
    pub amount_send: String,
    pub status: String,
}

pub struct AmlStore {
    pool: SqlitePool,
}

impl AmlStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, tx: &AmlTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO tron_aml_transactions (tx_id, status, ttype, score, crypto, amount, address, uid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tx_id) DO NOTHING",
        )
        .bind(&tx.tx_id)
        .bind(tx.status.as_str())
        .bind(tx.ttype.as_str())
        .bind(tx.score)
        .bind(&tx.crypto)
        .bind(&tx.amount)
        .bind(&tx.address)
        .bind(&tx.uid)
        .execute(&self.pool)
        .await
        .context("inserting aml transaction")?;
        Ok(())
    }

    pub async fn set_status(&self, tx_id: &str, status: AmlStatus, score: Option<f64>) -> Result<()> {
        if let Some(score) = score {
            sqlx::query(
                "UPDATE tron_aml_transactions SET status = ?, score = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE tx_id = ?",
            )
            .bind(status.as_str())
            .bind(score)
            .bind(tx_id)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE tron_aml_transactions SET status = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE tx_id = ?",
            )
            .bind(status.as_str())
            .bind(tx_id)
            .execute(&self.pool)
            .await
        }
        .context("updating aml transaction status")?;
        Ok(())
    }

    pub async fn get(&self, tx_id: &str) -> Result<Option<AmlTransaction>> {
        let row = sqlx::query_as::<_, (String, String, String, f64, String, String, String, Option<String>)>(
            "SELECT tx_id, status, ttype, score, crypto, amount, address, uid FROM tron_aml_transactions WHERE tx_id = ?",
        )
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await
        .context("reading aml transaction")?;

        row.map(|(tx_id, status, ttype, score, crypto, amount, address, uid)| {
            Ok(AmlTransaction {
                tx_id,
                status: AmlStatus::parse(&status)?,
                ttype: AmlTxType::parse(&ttype)?,
                score,
                crypto,
                amount,
                address,
                uid,
            })
        })
        .transpose()
    }

    pub async fn list_by_status(&self, status: AmlStatus) -> Result<Vec<AmlTransaction>> {
        let rows = sqlx::query_as::<_, (String, String, String, f64, String, String, String, Option<String>)>(
            "SELECT tx_id, status, ttype, score, crypto, amount, address, uid FROM tron_aml_transactions WHERE status = ?",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("listing aml transactions by status")?;

        rows.into_iter()
            .map(|(tx_id, status, ttype, score, crypto, amount, address, uid)| {
                Ok(AmlTransaction {
                    tx_id,
                    status: AmlStatus::parse(&status)?,
                    ttype: AmlTxType::parse(&ttype)?,
                    score,
                    crypto,
                    amount,
                    address,
                    uid,
                })
            })
            .collect()
    }

    pub async fn list_by_address(&self, address: &str) -> Result<Vec<AmlTransaction>> {
        let rows = sqlx::query_as::<_, (String, String, String, f64, String, String, String, Option<String>)>(
            "SELECT tx_id, status, ttype, score, crypto, amount, address, uid FROM tron_aml_transactions WHERE address = ?",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await
        .context("listing aml transactions by address")?;

        rows.into_iter()
            .map(|(tx_id, status, ttype, score, crypto, amount, address, uid)| {
                Ok(AmlTransaction {
                    tx_id,
                    status: AmlStatus::parse(&status)?,
                    ttype: AmlTxType::parse(&ttype)?,
                    score,
                    crypto,
                    amount,
                    address,
                    uid,
                })
            })
            .collect()
    }

    /// Committed payouts for `tx_id`. Used to make split-payout construction idempotent
    /// (spec §4.6, testable property #10): destinations already covered here are skipped.
    pub async fn payouts_for_tx(&self, tx_id: &str) -> Result<Vec<AmlPayout>> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, String, String, String, String, String)>(
            "SELECT id, tx_id, external_tx_id, address, crypto, amount_calc, amount_send, status FROM tron_aml_payouts WHERE tx_id = ?",
        )
        .bind(tx_id)
        .fetch_all(&self.pool)
        .await
        .context("listing aml payouts")?;

        Ok(rows
            .into_iter()
            .map(
                |(id, tx_id, external_tx_id, address, crypto, amount_calc, amount_send, status)| AmlPayout {
                    id,
                    tx_id,
                    external_tx_id,
                    address,
                    crypto,
                    amount_calc,
                    amount_send,
                    status,
                },
            )
            .collect())
    }

    pub async fn insert_payout(&self, payout: &AmlPayout) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO tron_aml_payouts (tx_id, external_tx_id, address, crypto, amount_calc, amount_send, status)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&payout.tx_id)
        .bind(&payout.external_tx_id)
        .bind(&payout.address)
        .bind(&payout.crypto)
        .bind(&payout.amount_calc)
        .bind(&payout.amount_send)
        .bind(&payout.status)
        .fetch_one(&self.pool)
        .await
        .context("inserting aml payout")?;
        Ok(id)
    }

    pub async fn mark_payout_sent(&self, id: i64, external_tx_id: &str) -> Result<()> {
        sqlx::query("UPDATE tron_aml_payouts SET external_tx_id = ?, status = 'sent' WHERE id = ?")
            .bind(external_tx_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("marking aml payout sent")?;
        Ok(())
    }
}
