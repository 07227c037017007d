use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};
use std::sync::Arc;

/// Ambient metrics surface, modeled on `apps/solver/src/metrics.rs::SolverTelemetry`, renamed and
/// re-scoped to this gateway's own counters.
struct Inner {
    blocks_scanned_total: Counter<u64>,
    blocks_failed_total: Counter<u64>,
    notifications_sent_total: Counter<u64>,
    notification_errors_total: Counter<u64>,
    sweeps_executed_total: Counter<u64>,
    sweep_errors_total: Counter<u64>,
    payouts_executed_total: Counter<u64>,
    payout_errors_total: Counter<u64>,
    aml_transactions_recorded_total: Counter<u64>,
    scan_latency_ms: Histogram<u64>,
    rpc_latency_ms: Histogram<u64>,
}

#[derive(Clone)]
pub struct GatewayTelemetry {
    inner: Arc<Inner>,
}

impl GatewayTelemetry {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("gateway");
        Self {
            inner: Arc::new(Inner {
                blocks_scanned_total: meter
                    .u64_counter("gateway.blocks_scanned")
                    .with_description("Blocks successfully committed by the scanner")
                    .build(),
                blocks_failed_total: meter
                    .u64_counter("gateway.blocks_failed")
                    .with_description("Block scans that failed and triggered a chunk retry")
                    .build(),
                notifications_sent_total: meter
                    .u64_counter("gateway.notifications_sent")
                    .with_description("Successful walletnotify calls to Keeper")
                    .build(),
                notification_errors_total: meter
                    .u64_counter("gateway.notification_errors")
                    .with_description("Failed walletnotify calls to Keeper")
                    .build(),
                sweeps_executed_total: meter
                    .u64_counter("gateway.sweeps_executed")
                    .with_description("Sweep orchestrator runs that completed")
                    .build(),
                sweep_errors_total: meter
                    .u64_counter("gateway.sweep_errors")
                    .with_description("Sweep orchestrator runs that failed")
                    .build(),
                payouts_executed_total: meter
                    .u64_counter("gateway.payouts_executed")
                    .with_description("Payout executor steps that completed")
                    .build(),
                payout_errors_total: meter
                    .u64_counter("gateway.payout_errors")
                    .with_description("Payout executor steps that failed")
                    .build(),
                aml_transactions_recorded_total: meter
                    .u64_counter("gateway.aml_transactions_recorded")
                    .with_description("AML transactions recorded by the scanner")
                    .build(),
                scan_latency_ms: meter
                    .u64_histogram("gateway.scan_latency_ms")
                    .with_description("Per-block scan latency")
                    .build(),
                rpc_latency_ms: meter
                    .u64_histogram("gateway.rpc_latency_ms")
                    .with_description("Chain RPC round-trip latency")
                    .build(),
            }),
        }
    }

    pub fn block_scanned(&self) {
        self.inner.blocks_scanned_total.add(1, &[]);
    }

    pub fn block_failed(&self) {
        self.inner.blocks_failed_total.add(1, &[]);
    }

    pub fn notification_sent(&self, symbol: &str) {
        self.inner
            .notifications_sent_total
            .add(1, &[KeyValue::new("symbol", symbol.to_string())]);
    }

    pub fn notification_error(&self, symbol: &str) {
        self.inner
            .notification_errors_total
            .add(1, &[KeyValue::new("symbol", symbol.to_string())]);
    }

    pub fn sweep_executed(&self) {
        self.inner.sweeps_executed_total.add(1, &[]);
    }

    pub fn sweep_error(&self) {
        self.inner.sweep_errors_total.add(1, &[]);
    }

    pub fn payout_executed(&self) {
        self.inner.payouts_executed_total.add(1, &[]);
    }

    pub fn payout_error(&self) {
        self.inner.payout_errors_total.add(1, &[]);
    }

    pub fn aml_transaction_recorded(&self) {
        self.inner.aml_transactions_recorded_total.add(1, &[]);
    }

    pub fn observe_scan_latency_ms(&self, ms: u64) {
        self.inner.scan_latency_ms.record(ms, &[]);
    }

    pub fn observe_rpc_latency_ms(&self, ms: u64) {
        self.inner.rpc_latency_ms.record(ms, &[]);
    }
}

impl Default for GatewayTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
