use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Per the distilled type model (`fee_deposit | onetime | energy | only_read`); the original's
/// `only_read_finished` sub-state is folded into `only_read` + a `finished` flag (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    FeeDeposit,
    Onetime,
    Energy,
    OnlyRead,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::FeeDeposit => "fee_deposit",
            KeyType::Onetime => "onetime",
            KeyType::Energy => "energy",
            KeyType::OnlyRead => "only_read",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "fee_deposit" => KeyType::FeeDeposit,
            "onetime" => KeyType::Onetime,
            "energy" => KeyType::Energy,
            "only_read" => KeyType::OnlyRead,
            other => bail!("unknown key type {other}"),
        })
    }

    /// `fee_deposit` and `energy` are singleton types (Key Record invariant, spec §3).
    pub fn is_singleton(self) -> bool {
        matches!(self, KeyType::FeeDeposit | KeyType::Energy)
    }
}

#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub id: i64,
    pub symbol: String,
    pub key_type: KeyType,
    pub public: String,
    /// Ciphertext, or `None` when `externally_managed` is set.
    pub private: Option<String>,
    pub externally_managed: bool,
    pub finished: bool,
}

fn row_to_record(
    id: i64,
    symbol: String,
    type_: String,
    public: String,
    private: Option<String>,
    externally_managed: i64,
    finished: i64,
) -> Result<KeyRecord> {
    Ok(KeyRecord {
        id,
        symbol,
        key_type: KeyType::parse(&type_)?,
        public,
        private,
        externally_managed: externally_managed != 0,
        finished: finished != 0,
    })
}

pub struct KeyStore {
    pool: SqlitePool,
}

impl KeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new key record. Fails if `key_type` is a singleton type and one already exists.
    pub async fn add_key(
        &self,
        symbol: &str,
        key_type: KeyType,
        public: &str,
        private_ciphertext: Option<&str>,
        externally_managed: bool,
    ) -> Result<i64> {
        if key_type.is_singleton() {
            let existing = self.get_by_type(symbol, key_type).await?;
            if existing.is_some() {
                bail!("a {:?} key already exists for symbol {symbol}", key_type);
            }
        }

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO keys (symbol, type, public, private, externally_managed) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(symbol)
        .bind(key_type.as_str())
        .bind(public)
        .bind(private_ciphertext)
        .bind(externally_managed as i64)
        .fetch_one(&self.pool)
        .await
        .context("inserting key record")?;

        Ok(id)
    }

    pub async fn get_by_type(&self, symbol: &str, key_type: KeyType) -> Result<Option<KeyRecord>> {
        let row = sqlx::query_as::<_, (i64, String, String, String, Option<String>, i64, i64)>(
            "SELECT id, symbol, type, public, private, externally_managed, finished FROM keys WHERE symbol = ? AND type = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(symbol)
        .bind(key_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("querying key by type")?;

        row.map(|(id, symbol, t, public, private, em, fin)| {
            row_to_record(id, symbol, t, public, private, em, fin)
        })
        .transpose()
    }

    pub async fn get_by_public(&self, public: &str) -> Result<Option<KeyRecord>> {
        let row = sqlx::query_as::<_, (i64, String, String, String, Option<String>, i64, i64)>(
            "SELECT id, symbol, type, public, private, externally_managed, finished FROM keys WHERE public = ?",
        )
        .bind(public)
        .fetch_optional(&self.pool)
        .await
        .context("querying key by public address")?;

        row.map(|(id, symbol, t, public, private, em, fin)| {
            row_to_record(id, symbol, t, public, private, em, fin)
        })
        .transpose()
    }

    pub async fn list_by_type(&self, symbol: &str, key_type: KeyType) -> Result<Vec<KeyRecord>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, Option<String>, i64, i64)>(
            "SELECT id, symbol, type, public, private, externally_managed, finished FROM keys WHERE symbol = ? AND type = ? ORDER BY id ASC",
        )
        .bind(symbol)
        .bind(key_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("listing keys by type")?;

        rows.into_iter()
            .map(|(id, symbol, t, public, private, em, fin)| {
                row_to_record(id, symbol, t, public, private, em, fin)
            })
            .collect()
    }

    pub async fn mark_finished(&self, public: &str) -> Result<()> {
        sqlx::query("UPDATE keys SET finished = 1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE public = ?")
            .bind(public)
            .execute(&self.pool)
            .await
            .context("marking key finished")?;
        Ok(())
    }

    /// Used once at startup when reconciling stored ciphertext format against the runtime
    /// encryption mode (spec §4.2).
    pub async fn all_with_private(&self) -> Result<Vec<KeyRecord>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, Option<String>, i64, i64)>(
            "SELECT id, symbol, type, public, private, externally_managed, finished FROM keys WHERE private IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing keys with private material")?;

        rows.into_iter()
            .map(|(id, symbol, t, public, private, em, fin)| {
                row_to_record(id, symbol, t, public, private, em, fin)
            })
            .collect()
    }

    pub async fn rewrite_private(&self, id: i64, ciphertext: &str) -> Result<()> {
        sqlx::query("UPDATE keys SET private = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?")
            .bind(ciphertext)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("rewriting private key ciphertext")?;
        Ok(())
    }
}
