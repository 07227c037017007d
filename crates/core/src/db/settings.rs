use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub const LAST_SEEN_BLOCK_NUM: &str = "last_seen_block_num";
pub const CURRENT_SERVER_ID: &str = "current_server_id";

pub struct Settings {
    pool: SqlitePool,
}

impl Settings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, name: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("reading setting")?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn get_u64(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.get(name).await?.and_then(|v| v.parse().ok()))
    }

    pub async fn set(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (name, value) VALUES (?, ?) ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("writing setting")?;
        Ok(())
    }

    pub async fn set_u64(&self, name: &str, value: u64) -> Result<()> {
        self.set(name, &value.to_string()).await
    }
}
