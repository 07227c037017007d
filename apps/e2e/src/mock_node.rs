//! A minimal stand-in for both a Tron full node and Keeper, so the gateway binary can boot and
//! answer HTTP requests without a real chain or accounting backend behind it. Covers exactly the
//! `/wallet/*` and `/api/v1/*` calls the paths under test exercise; anything else 404s.

use axum::Json;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Router, http::StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;

/// Mutable state a test can poke before or during a run (e.g. set a treasury balance).
pub struct MockNodeState {
    pub head_block: AtomicU64,
    pub account_balance_sun: AtomicU64,
}

impl Default for MockNodeState {
    fn default() -> Self {
        Self { head_block: AtomicU64::new(1_000), account_balance_sun: AtomicU64::new(0) }
    }
}

pub struct MockNode {
    pub base_url: String,
    pub state: Arc<MockNodeState>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

async fn get_now_block(State(state): State<Arc<MockNodeState>>) -> Json<Value> {
    let num = state.head_block.load(Ordering::Relaxed);
    Json(json!({
        "block_header": {
            "raw_data": { "number": num, "timestamp": 0 }
        }
    }))
}

async fn get_account(State(state): State<Arc<MockNodeState>>, Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({ "balance": state.account_balance_sun.load(Ordering::Relaxed) }))
}

async fn get_account_resource() -> Json<Value> {
    Json(json!({
        "freeNetLimit": 5000,
        "NetLimit": 0,
        "EnergyLimit": 0,
        "TotalEnergyLimit": 0,
        "TotalEnergyWeight": 0,
    }))
}

async fn get_chain_parameters() -> Json<Value> {
    Json(json!({ "chainParameter": [] }))
}

async fn decrypt_disabled(Path(_symbol): Path<String>) -> Json<Value> {
    Json(json!({ "persistent_status": "disabled" }))
}

async fn not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

impl MockNode {
    pub async fn spawn() -> anyhow::Result<Self> {
        let state = Arc::new(MockNodeState::default());

        let router = Router::new()
            .route("/wallet/getnowblock", post(get_now_block))
            .route("/wallet/getaccount", post(get_account))
            .route("/wallet/getaccountresource", post(get_account_resource))
            .route("/wallet/getchainparameters", post(get_chain_parameters))
            .route("/wallet/gettransactionbyid", post(not_implemented))
            .route("/wallet/gettransactioninfobyid", post(not_implemented))
            .route("/wallet/createtransaction", post(not_implemented))
            .route("/wallet/triggersmartcontract", post(not_implemented))
            .route("/wallet/triggerconstantcontract", post(not_implemented))
            .route("/wallet/broadcasttransaction", post(not_implemented))
            .route("/api/v1/{symbol}/decrypt", get(decrypt_disabled))
            .route(
                "/api/v1/payoutnotify/{symbol}",
                post(|| async { Json(json!({ "status": "success" })) }),
            )
            .route(
                "/api/v1/walletnotify/{symbol}/{txid}",
                post(|| async { Json(json!({ "status": "success" })) }),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Ok(Self { base_url, state, _shutdown: tx })
    }
}
