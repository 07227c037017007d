use crate::mock_node::MockNode;
use crate::process::{KillOnDrop, null_stdio};
use crate::util::{find_free_port, temp_sqlite_path};
use anyhow::{Context, Result};
use gateway_core::db::keys::KeyType;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tron::TronAddress;

/// A running `gateway` binary wired to a [`MockNode`] standing in for the full node and Keeper,
/// plus a pool over the same SQLite file for fixture setup/assertions.
pub struct GatewayHarness {
    pub base_url: String,
    pub pool: SqlitePool,
    pub mock_node: MockNode,
    _child: KillOnDrop,
    _db_path: PathBuf,
}

impl GatewayHarness {
    /// Builds the schema, starts a mock node, spawns the gateway binary against it, and waits
    /// until it answers HTTP requests.
    pub async fn start(gateway_bin: &std::path::Path) -> Result<Self> {
        let db_path = temp_sqlite_path();
        let database_url = format!("sqlite://{}", db_path.display());

        let pool = gateway_core::db::connect(&database_url, 5).await.context("connecting fixture pool")?;
        gateway_core::db::migrate(&pool).await.context("running migrations for fixtures")?;

        let mock_node = MockNode::spawn().await.context("spawning mock node")?;
        let port = find_free_port().context("finding a free port for the gateway")?;
        let base_url = format!("http://127.0.0.1:{port}");

        let mut cmd = Command::new(gateway_bin);
        null_stdio(&mut cmd);
        cmd.env("DATABASE_URL", &database_url)
            .env("FULLNODE_URL", &mock_node.base_url)
            .env("SHKEEPER_HOST", &mock_node.base_url)
            .env("SHKEEPER_BACKEND_KEY", "test-backend-key")
            .env("HTTP_BIND_ADDR", format!("127.0.0.1:{port}"))
            .env("RUST_LOG", "info")
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("spawning gateway binary")?;

        crate::http::wait_for_http_ok(&format!("{base_url}/multiserver/status"), Duration::from_secs(20))
            .await
            .context("waiting for gateway to come up")?;

        Ok(Self { base_url, pool, mock_node, _child: KillOnDrop::new(child), _db_path: db_path })
    }

    /// Inserts a `fee_deposit` key directly (bypassing `/generate-address`, which has no
    /// equivalent for promoting a key to treasury). Wallet encryption is `disabled` on the mock
    /// Keeper, so the private hex is stored as-is, matching [`gateway_core::encryption`]'s
    /// identity behavior in that mode.
    pub async fn seed_treasury(&self) -> Result<String> {
        let keys = gateway_core::db::keys::KeyStore::new(self.pool.clone());
        let signing_key = SigningKey::random(&mut OsRng);
        let address = TronAddress::from_verifying_key(signing_key.verifying_key());
        let public = address.to_base58check();
        let private_hex = hex::encode(signing_key.to_bytes());

        keys.add_key("_", KeyType::FeeDeposit, &public, Some(&private_hex), false).await.context("seeding treasury key")?;
        Ok(public)
    }
}
