use e2e::binaries::cargo_build_gateway_bin;
use e2e::harness::GatewayHarness;
use reqwest::Client;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn gateway_bin() -> &'static Path {
    static BIN: OnceLock<PathBuf> = OnceLock::new();
    BIN.get_or_init(|| cargo_build_gateway_bin().expect("build gateway binary")).as_path()
}

#[tokio::test]
async fn multiserver_status_reports_the_mock_node() {
    let harness = GatewayHarness::start(gateway_bin()).await.expect("start gateway");

    let body: Value = Client::new()
        .get(format!("{}/multiserver/status", harness.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let statuses = body["statuses"].as_array().expect("statuses array");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["reachable"], true);
    assert_eq!(statuses[0]["head_block"], 1000);
}

#[tokio::test]
async fn generate_address_is_immediately_listed() {
    let harness = GatewayHarness::start(gateway_bin()).await.expect("start gateway");
    let client = Client::new();

    let generated: Value = client
        .post(format!("{}/generate-address", harness.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(generated["status"], "success");
    let address = generated["base58check_address"].as_str().expect("address string").to_string();
    assert!(!address.is_empty());

    let listed: Value = client.get(format!("{}/addresses", harness.base_url)).send().await.unwrap().json().await.unwrap();
    let accounts = listed["accounts"].as_array().expect("accounts array");
    assert!(accounts.iter().any(|a| a.as_str() == Some(address.as_str())));
}

#[tokio::test]
async fn unknown_task_reports_pending() {
    let harness = GatewayHarness::start(gateway_bin()).await.expect("start gateway");

    let body: Value = Client::new()
        .post(format!("{}/task/does-not-exist", harness.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "pending");
    assert_eq!(body["result"], Value::Null);
}

#[tokio::test]
async fn calc_tx_fee_returns_the_configured_flat_fee() {
    let harness = GatewayHarness::start(gateway_bin()).await.expect("start gateway");

    let body: Value = Client::new()
        .post(format!("{}/calc-tx-fee/12345", harness.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["fee"], 30_000_000);
}

#[tokio::test]
async fn balance_reads_the_treasury_from_the_mock_node() {
    let harness = GatewayHarness::start(gateway_bin()).await.expect("start gateway");
    harness.mock_node.state.account_balance_sun.store(5_000_000, std::sync::atomic::Ordering::Relaxed);
    let treasury = harness.seed_treasury().await.expect("seed treasury");

    let body: Value = Client::new().post(format!("{}/balance", harness.base_url)).send().await.unwrap().json().await.unwrap();

    assert_eq!(body["status"], "success");
    assert_eq!(body["balance"], "5000000");

    let fee_account: Value =
        Client::new().post(format!("{}/fee-deposit-account", harness.base_url)).send().await.unwrap().json().await.unwrap();
    assert_eq!(fee_account["account"], treasury);
    assert_eq!(fee_account["balance"], 5_000_000);
}
