mod aml_runner;
mod executor;
mod http;
mod maintenance;

use anyhow::{Context, Result};
use gateway_core::GatewayContext;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = gateway_core::config::load_config().context("loading configuration")?;
    let ctx = Arc::new(GatewayContext::bootstrap(config).await.context("bootstrapping context")?);
    ctx.seed_watched_set().await.context("seeding watched set")?;
    ctx.connections.elect_initial().await.context("electing initial full node")?;
    ctx.settle_encryption_mode().await.context("settling wallet encryption mode")?;

    tracing::info!(bind = %ctx.config.http_bind_addr, "gateway starting");

    let shutdown = CancellationToken::new();
    let mut join_set = tokio::task::JoinSet::new();

    let payouts = executor::spawn(ctx.clone(), shutdown.clone());

    join_set.spawn(aml_runner::run_aml_recheck(ctx.clone(), shutdown.clone()));
    join_set.spawn(aml_runner::run_sweep_accounts(ctx.clone(), shutdown.clone()));
    join_set.spawn(maintenance::run_daily_fee_reclaim(ctx.clone(), shutdown.clone()));

    let router = http::build_router(ctx.clone(), payouts).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&ctx.config.http_bind_addr)
        .await
        .with_context(|| format!("binding http listener on {}", ctx.config.http_bind_addr))?;

    let http_shutdown = shutdown.clone();
    join_set.spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "http server exited with an error");
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
        res = join_set.join_next() => {
            if let Some(res) = res {
                tracing::error!(?res, "a gateway runner exited unexpectedly");
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
