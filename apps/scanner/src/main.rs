mod runner;

use anyhow::{Context, Result};
use gateway_core::GatewayContext;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = gateway_core::config::load_config().context("loading configuration")?;
    let ctx = Arc::new(GatewayContext::bootstrap(config).await.context("bootstrapping context")?);
    ctx.seed_watched_set().await.context("seeding watched set")?;
    ctx.settle_encryption_mode().await.context("settling wallet encryption mode")?;

    tracing::info!(
        endpoints = ctx.config.chain.endpoints.len(),
        network = %ctx.config.chain.network,
        "scanner starting"
    );

    let shutdown = CancellationToken::new();
    let mut join_set = tokio::task::JoinSet::new();

    join_set.spawn(runner::run_connection_refresher(ctx.clone(), shutdown.clone()));
    join_set.spawn(runner::run_block_scanner(ctx.clone(), shutdown.clone()));
    join_set.spawn(runner::run_scanner_stats(ctx.clone(), shutdown.clone()));

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
        res = join_set.join_next() => {
            if let Some(res) = res {
                tracing::error!(?res, "a scanner runner exited unexpectedly");
            }
            shutdown.cancel();
        }
    }

    while let Some(res) = join_set.join_next().await {
        if let Err(e) = res {
            tracing::error!(error = %e, "runner task panicked during shutdown");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
