use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use std::str::FromStr;

pub mod aml;
pub mod balances;
pub mod keys;
pub mod settings;
pub mod tasks;

/// Numbered migrations, applied in order and tracked in `_migrations`.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("migrations/0001_schema.sql")),
    (2, include_str!("migrations/0002_tasks.sql")),
];

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing DATABASE_URL {database_url}"))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await
        .context("connecting to sqlite database")?;

    Ok(pool)
}

/// Runs every pending migration inside one `BEGIN IMMEDIATE` transaction.
///
/// SQLite has no cross-connection advisory lock like Postgres; since this gateway is a
/// single-process-per-ledger deployment (no concurrent migration race to guard against), a
/// single exclusive transaction over the whole sequence is sufficient.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await.context("beginning migration transaction")?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')))",
    )
    .await
    .context("creating schema_migrations")?;

    for (version, sql) in MIGRATIONS {
        let applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(version)
                .fetch_optional(&mut *tx)
                .await
                .context("checking schema_migrations")?;
        if applied.is_some() {
            continue;
        }
        tx.execute(*sql)
            .await
            .with_context(|| format!("applying migration {version}"))?;
        sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .context("recording schema_migrations row")?;
    }

    tx.commit().await.context("committing migration transaction")?;
    Ok(())
}
