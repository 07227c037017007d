use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub struct Balances {
    pool: SqlitePool,
}

impl Balances {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, account: &str, symbol: &str, balance: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO balances (account, symbol, balance, updated_at) VALUES (?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(account, symbol) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at",
        )
        .bind(account)
        .bind(symbol)
        .bind(balance)
        .execute(&self.pool)
        .await
        .context("upserting balance")?;
        Ok(())
    }

    pub async fn get(&self, account: &str, symbol: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT balance FROM balances WHERE account = ? AND symbol = ?")
                .bind(account)
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await
                .context("reading balance")?;
        Ok(row.map(|(b,)| b))
    }
}
