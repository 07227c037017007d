use super::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use gateway_core::db::settings::LAST_SEEN_BLOCK_NUM;
use std::fmt::Write;

/// `GET /metrics`, grounded on `original_source/app/api/metrics.py`. Hand-formats a minimal
/// Prometheus text-exposition body from `ConnectionManager::servers_status` and the scanner's
/// last-seen-block setting; the original's `tron_fullnode_version`/`tron_fullnode_last_release`
/// gauges needed a full-node `codeVersion` field and a GitHub Releases lookup this gateway has
/// no other use for, so they're dropped rather than carrying a new dependency for two fields.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::new();

    writeln!(out, "# HELP tron_fullnode_reachable Whether the full node answered getnowblock.").ok();
    writeln!(out, "# TYPE tron_fullnode_reachable gauge").ok();
    writeln!(out, "# HELP tron_fullnode_last_block Head block number reported by the full node.").ok();
    writeln!(out, "# TYPE tron_fullnode_last_block gauge").ok();
    writeln!(out, "# HELP tron_fullnode_lag_seconds Seconds between the full node's head block and now.").ok();
    writeln!(out, "# TYPE tron_fullnode_lag_seconds gauge").ok();

    for server in state.ctx.connections.servers_status().await {
        writeln!(out, "tron_fullnode_reachable{{server=\"{}\"}} {}", server.name, server.reachable as u8).ok();
        if let Some(head) = server.head_block {
            writeln!(out, "tron_fullnode_last_block{{server=\"{}\"}} {head}", server.name).ok();
        }
        if let Some(lag) = server.lag_secs {
            writeln!(out, "tron_fullnode_lag_seconds{{server=\"{}\"}} {lag}", server.name).ok();
        }
    }

    let last_seen = state.ctx.settings.get_u64(LAST_SEEN_BLOCK_NUM).await.ok().flatten().unwrap_or(0);
    writeln!(out, "# HELP tron_wallet_last_block Last block number the gateway's scanner has processed.").ok();
    writeln!(out, "# TYPE tron_wallet_last_block gauge").ok();
    writeln!(out, "tron_wallet_last_block {last_seen}").ok();

    ([("content-type", "text/plain; version=0.0.4")], out)
}
