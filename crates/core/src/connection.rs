use crate::config::FullnodeEntry;
use crate::db::settings::{CURRENT_SERVER_ID, Settings};
use crate::error::GatewayError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tron::ChainClient;

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub url: String,
    pub reachable: bool,
    pub head_block: Option<u64>,
    pub lag_secs: Option<i64>,
}

/// Multi-endpoint full-node pool with health scoring, active-server election, and failover.
/// Grounded on `original_source/app/connection_manager.py`'s election algorithm, redesigned from
/// a class-level singleton into explicit instance state per DESIGN.md.
pub struct ConnectionManager {
    endpoints: Vec<FullnodeEntry>,
    clients: Vec<ChainClient>,
    settings: Arc<Settings>,
}

fn block_number(block: &serde_json::Value) -> Option<u64> {
    block.get("block_header")?.get("raw_data")?.get("number")?.as_u64()
}

fn block_timestamp_ms(block: &serde_json::Value) -> Option<i64> {
    block.get("block_header")?.get("raw_data")?.get("timestamp")?.as_i64()
}

impl ConnectionManager {
    pub fn new(endpoints: Vec<FullnodeEntry>, settings: Arc<Settings>) -> Result<Self> {
        let clients = endpoints
            .iter()
            .map(|e| ChainClient::new(vec![e.url.clone()]))
            .collect::<Result<Vec<_>>>()
            .context("building per-endpoint chain clients")?;
        Ok(Self { endpoints, clients, settings })
    }

    /// Returns a client bound to the currently elected endpoint.
    pub async fn client(&self) -> Result<ChainClient> {
        let idx = self
            .settings
            .get_u64(CURRENT_SERVER_ID)
            .await?
            .map(|v| v as usize)
            .ok_or(GatewayError::NoServerSet)?;
        self.clients.get(idx).cloned().ok_or_else(|| GatewayError::NoServerSet.into())
    }

    pub async fn servers_status(&self) -> Vec<ServerStatus> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut statuses = Vec::with_capacity(self.endpoints.len());
        for (entry, client) in self.endpoints.iter().zip(self.clients.iter()) {
            match client.now_block().await {
                Ok(block) => {
                    let head_block = block_number(&block);
                    let lag_secs = block_timestamp_ms(&block).map(|ts| (now_ms - ts) / 1000);
                    statuses.push(ServerStatus {
                        name: entry.name.clone(),
                        url: entry.url.clone(),
                        reachable: true,
                        head_block,
                        lag_secs,
                    });
                }
                Err(_) => statuses.push(ServerStatus {
                    name: entry.name.clone(),
                    url: entry.url.clone(),
                    reachable: false,
                    head_block: None,
                    lag_secs: None,
                }),
            }
        }
        statuses
    }

    /// Elects the endpoint with the maximum head block among reachable endpoints; ties break by
    /// input order. Returns whether the elected index changed.
    pub async fn refresh_best_server(&self) -> Result<bool> {
        let statuses = self.servers_status().await;

        let best = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.reachable)
            .max_by_key(|(i, s)| (s.head_block.unwrap_or(0), std::cmp::Reverse(*i)))
            .map(|(i, _)| i);

        let Some(best) = best else {
            return Err(GatewayError::AllServersOffline.into());
        };

        let previous = self.settings.get_u64(CURRENT_SERVER_ID).await?;
        self.settings.set_u64(CURRENT_SERVER_ID, best as u64).await?;
        Ok(previous != Some(best as u64))
    }

    /// Retries forever until one endpoint responds, for the initial election at boot.
    pub async fn elect_initial(&self) -> Result<()> {
        loop {
            match self.refresh_best_server().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "initial server election failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                }
            }
        }
    }

    pub async fn switch_to(&self, index: usize) -> Result<()> {
        if index >= self.endpoints.len() {
            return Err(GatewayError::Validation(format!("no such server index {index}")).into());
        }
        self.settings.set_u64(CURRENT_SERVER_ID, index as u64).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_breaks_ties_by_input_order() {
        let heads = vec![Some(100u64), Some(120), Some(120)];
        let best = heads
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .max_by_key(|(i, h)| (h.unwrap(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i);
        assert_eq!(best, Some(1));
    }
}
