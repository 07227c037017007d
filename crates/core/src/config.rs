use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

trait IfEmpty {
    fn if_empty(self, default: Self) -> Self;
}

impl IfEmpty for Vec<String> {
    fn if_empty(self, default: Self) -> Self {
        if self.is_empty() { default } else { self }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FullnodeEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseEnv {
    tron_network: Option<String>,
    fullnode_url: Option<String>,
    multiserver_config_json: Option<String>,
    tokens_json: Option<String>,

    block_scanner_max_block_chunk_size: Option<u32>,
    block_scanner_interval_time: Option<u64>,
    block_scanner_last_block_num_hint: Option<u64>,
    block_scanner_stats_log_period: Option<u64>,

    shkeeper_host: Option<String>,
    shkeeper_backend_key: Option<String>,

    tx_fee: Option<u64>,
    tx_fee_limit: Option<u64>,
    internal_tx_fee: Option<u64>,
    bandwidth_per_trx_transfer: Option<u64>,
    bandwidth_per_trc20_transfer: Option<u64>,
    trx_per_bandwidth_unit: Option<u64>,
    trx_min_transfer_threshold: Option<u64>,
    token_min_transfer_thresholds_json: Option<String>,

    energy_delegation_mode: Option<bool>,
    energy_delegation_allow_burn_fallback: Option<bool>,
    energy_delegation_factor_ppm: Option<u64>,
    energy_delegation_activation_sun: Option<u64>,
    energy_delegation_lock: Option<bool>,
    energy_delegation_lock_period: Option<u64>,

    external_drain_config: Option<String>,
    aml_wait_before_api_call: Option<u64>,
    aml_result_update_period: Option<u64>,
    aml_sweep_accounts_period: Option<u64>,
    aml_api_url: Option<String>,
    aml_api_key: Option<String>,
    aml_min_check_amount_sun: Option<u64>,

    force_wallet_encryption: Option<bool>,

    database_url: Option<String>,
    db_max_connections: Option<u32>,
    http_bind_addr: Option<String>,
    concurrent_max_workers: Option<usize>,
    concurrent_max_retries: Option<u32>,
    payout_step_workers: Option<usize>,
}

const DEFAULT_MAX_BLOCK_CHUNK_SIZE: u32 = 20;
const DEFAULT_INTERVAL_TIME: u64 = 3;
const DEFAULT_STATS_LOG_PERIOD: u64 = 60;
const DEFAULT_TX_FEE: u64 = 30_000_000; // 30 TRX
const DEFAULT_TX_FEE_LIMIT: u64 = 50_000_000;
const DEFAULT_INTERNAL_TX_FEE: u64 = 10_000_000;
const DEFAULT_BANDWIDTH_PER_TRX_TRANSFER: u64 = 268;
const DEFAULT_BANDWIDTH_PER_TRC20_TRANSFER: u64 = 345;
const DEFAULT_TRX_PER_BANDWIDTH_UNIT: u64 = 1000;
const DEFAULT_TRX_MIN_TRANSFER_THRESHOLD: u64 = 1_000_000;
const DEFAULT_ENERGY_DELEGATION_FACTOR_PPM: u64 = 1_100_000; // 1.1x headroom
const DEFAULT_ENERGY_DELEGATION_ACTIVATION_SUN: u64 = 100_000; // 0.1 TRX
const DEFAULT_AML_WAIT_BEFORE_API_CALL: u64 = 60;
const DEFAULT_AML_RESULT_UPDATE_PERIOD: u64 = 300;
const DEFAULT_AML_SWEEP_ACCOUNTS_PERIOD: u64 = 3600;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CONCURRENT_MAX_WORKERS: usize = 4;
const DEFAULT_CONCURRENT_MAX_RETRIES: u32 = 3;
const DEFAULT_PAYOUT_STEP_WORKERS: usize = 4;
const DEFAULT_HTTP_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u32,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub network: String,
    pub endpoints: Vec<FullnodeEntry>,
    /// Configured TRC-20 contracts, keyed by base58check address.
    pub tokens: BTreeMap<String, TokenInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    pub max_block_chunk_size: u32,
    pub interval_time_secs: u64,
    pub last_block_num_hint: Option<u64>,
    pub stats_log_period_secs: u64,
}

#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub host: String,
    pub backend_key: String,
}

#[derive(Debug, Clone)]
pub struct FeeConfig {
    pub tx_fee_sun: u64,
    pub tx_fee_limit_sun: u64,
    pub internal_tx_fee_sun: u64,
    pub bandwidth_per_trx_transfer: u64,
    pub bandwidth_per_trc20_transfer: u64,
    pub trx_per_bandwidth_unit_sun: u64,
    pub trx_min_transfer_threshold_sun: u64,
    pub token_min_transfer_thresholds: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnergyDelegationConfig {
    pub enabled: bool,
    pub allow_burn_fallback: bool,
    pub factor_ppm: u64,
    pub activation_sun: u64,
    pub lock: bool,
    pub lock_period_blocks: u64,
}

/// A single risk-score interval's payout split, ratios summing to 1 across addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct SplitEntry {
    pub address: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreIntervalSplit {
    pub min_score: f64,
    pub max_score: f64,
    pub split: Vec<SplitEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmlCryptoConfig {
    pub min_check_amount: String,
    pub regular_split: Vec<SplitEntry>,
    pub risk_split: Vec<ScoreIntervalSplit>,
}

/// Typed replacement for the original's untyped `EXTERNAL_DRAIN_CONFIG` dict, per the
/// dynamic-dict-config -> typed-schema redesign note.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DrainConfig {
    Disabled,
    Enabled {
        #[serde(default)]
        symbols: BTreeMap<String, AmlCryptoConfig>,
    },
}

impl Default for DrainConfig {
    fn default() -> Self {
        DrainConfig::Disabled
    }
}

#[derive(Debug, Clone)]
pub struct AmlConfig {
    pub drain: DrainConfig,
    pub wait_before_api_call_secs: u64,
    pub result_update_period_secs: u64,
    pub sweep_accounts_period_secs: u64,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub min_check_amount_sun: u64,
}

impl AmlConfig {
    pub fn enabled(&self) -> bool {
        matches!(self.drain, DrainConfig::Enabled { .. })
    }
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub force_wallet_encryption: bool,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub concurrent_max_workers: usize,
    pub concurrent_max_retries: u32,
    /// Bounds how many `PayoutStep`s within a single batch run concurrently, distinct from
    /// `concurrent_max_workers`'s bound on whole `PayoutJob`s.
    pub payout_step_workers: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub scanner: ScannerConfig,
    pub keeper: KeeperConfig,
    pub fees: FeeConfig,
    pub energy: EnergyDelegationConfig,
    pub aml: AmlConfig,
    pub encryption: EncryptionConfig,
    pub jobs: JobConfig,
    pub database_url: String,
    pub db_max_connections: u32,
    pub http_bind_addr: String,
}

pub fn load_config() -> Result<AppConfig> {
    let env: BaseEnv = envy::from_env().context("reading environment")?;

    let network = env.tron_network.unwrap_or_else(|| "main".to_string());

    let mut endpoints: Vec<FullnodeEntry> = Vec::new();
    if let Some(json) = env.multiserver_config_json.as_deref() {
        let parsed: Vec<FullnodeEntry> =
            serde_json::from_str(json).context("parsing MULTISERVER_CONFIG_JSON")?;
        endpoints.extend(parsed);
    }
    if endpoints.is_empty() {
        let urls = parse_list(env.fullnode_url.as_deref().unwrap_or_default());
        endpoints = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| FullnodeEntry { name: format!("fullnode-{i}"), url })
            .collect::<Vec<_>>()
            .if_empty(Vec::new());
    }
    if endpoints.is_empty() {
        anyhow::bail!("no full node endpoints configured: set FULLNODE_URL or MULTISERVER_CONFIG_JSON");
    }

    let token_min_transfer_thresholds: BTreeMap<String, u64> = env
        .token_min_transfer_thresholds_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("parsing TOKEN_MIN_TRANSFER_THRESHOLDS_JSON")?
        .unwrap_or_default();

    let drain = env
        .external_drain_config
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("parsing EXTERNAL_DRAIN_CONFIG")?
        .unwrap_or_default();

    let tokens: BTreeMap<String, TokenInfo> = env
        .tokens_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("parsing TOKENS_JSON")?
        .unwrap_or_default();

    Ok(AppConfig {
        chain: ChainConfig { network, endpoints, tokens },
        scanner: ScannerConfig {
            max_block_chunk_size: env
                .block_scanner_max_block_chunk_size
                .unwrap_or(DEFAULT_MAX_BLOCK_CHUNK_SIZE)
                .max(1),
            interval_time_secs: env.block_scanner_interval_time.unwrap_or(DEFAULT_INTERVAL_TIME).max(1),
            last_block_num_hint: env.block_scanner_last_block_num_hint,
            stats_log_period_secs: env
                .block_scanner_stats_log_period
                .unwrap_or(DEFAULT_STATS_LOG_PERIOD)
                .max(1),
        },
        keeper: KeeperConfig {
            host: env.shkeeper_host.context("SHKEEPER_HOST is required")?,
            backend_key: env.shkeeper_backend_key.context("SHKEEPER_BACKEND_KEY is required")?,
        },
        fees: FeeConfig {
            tx_fee_sun: env.tx_fee.unwrap_or(DEFAULT_TX_FEE),
            tx_fee_limit_sun: env.tx_fee_limit.unwrap_or(DEFAULT_TX_FEE_LIMIT),
            internal_tx_fee_sun: env.internal_tx_fee.unwrap_or(DEFAULT_INTERNAL_TX_FEE),
            bandwidth_per_trx_transfer: env
                .bandwidth_per_trx_transfer
                .unwrap_or(DEFAULT_BANDWIDTH_PER_TRX_TRANSFER),
            bandwidth_per_trc20_transfer: env
                .bandwidth_per_trc20_transfer
                .unwrap_or(DEFAULT_BANDWIDTH_PER_TRC20_TRANSFER),
            trx_per_bandwidth_unit_sun: env
                .trx_per_bandwidth_unit
                .unwrap_or(DEFAULT_TRX_PER_BANDWIDTH_UNIT),
            trx_min_transfer_threshold_sun: env
                .trx_min_transfer_threshold
                .unwrap_or(DEFAULT_TRX_MIN_TRANSFER_THRESHOLD),
            token_min_transfer_thresholds,
        },
        energy: EnergyDelegationConfig {
            enabled: env.energy_delegation_mode.unwrap_or(false),
            allow_burn_fallback: env.energy_delegation_allow_burn_fallback.unwrap_or(true),
            factor_ppm: env
                .energy_delegation_factor_ppm
                .unwrap_or(DEFAULT_ENERGY_DELEGATION_FACTOR_PPM),
            activation_sun: env
                .energy_delegation_activation_sun
                .unwrap_or(DEFAULT_ENERGY_DELEGATION_ACTIVATION_SUN),
            lock: env.energy_delegation_lock.unwrap_or(false),
            lock_period_blocks: env.energy_delegation_lock_period.unwrap_or(0),
        },
        aml: AmlConfig {
            drain,
            wait_before_api_call_secs: env
                .aml_wait_before_api_call
                .unwrap_or(DEFAULT_AML_WAIT_BEFORE_API_CALL),
            result_update_period_secs: env
                .aml_result_update_period
                .unwrap_or(DEFAULT_AML_RESULT_UPDATE_PERIOD),
            sweep_accounts_period_secs: env
                .aml_sweep_accounts_period
                .unwrap_or(DEFAULT_AML_SWEEP_ACCOUNTS_PERIOD),
            api_url: env.aml_api_url,
            api_key: env.aml_api_key,
            min_check_amount_sun: env.aml_min_check_amount_sun.unwrap_or(0),
        },
        encryption: EncryptionConfig {
            force_wallet_encryption: env.force_wallet_encryption.unwrap_or(false),
        },
        jobs: JobConfig {
            concurrent_max_workers: env
                .concurrent_max_workers
                .unwrap_or(DEFAULT_CONCURRENT_MAX_WORKERS)
                .max(1),
            concurrent_max_retries: env
                .concurrent_max_retries
                .unwrap_or(DEFAULT_CONCURRENT_MAX_RETRIES),
            payout_step_workers: env.payout_step_workers.unwrap_or(DEFAULT_PAYOUT_STEP_WORKERS).max(1),
        },
        database_url: env.database_url.context("DATABASE_URL is required")?,
        db_max_connections: env.db_max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS).max(1),
        http_bind_addr: env.http_bind_addr.unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDR.to_string()),
    })
}
