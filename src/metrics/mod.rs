use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("block_processing_time".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .unwrap()
        .install_recorder()
        .unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_block_indexed(&self) {
        metrics::increment_counter!("blocks_indexed_total");
    }

    pub fn record_block_processing_time(&self, duration: Duration) {
        metrics::histogram!("block_processing_time", duration.as_secs_f64());
    }

    pub fn record_transactions_indexed(&self, count: u64) {
        metrics::counter!("transactions_indexed_total", count);
    }

    pub fn record_token_transfer(&self) {
        metrics::increment_counter!("token_transfers_total");
    }

    pub fn record_reorg(&self, depth: i64) {
        metrics::increment_counter!("reorgs_total");
        metrics::gauge!("last_reorg_depth", depth as f64);
    }

    pub fn record_rpc_failure(&self) {
        metrics::increment_counter!("rpc_failures_total");
    }

    pub fn record_recovery(&self) {
        metrics::increment_counter!("rpc_recoveries_total");
    }

    /// Updates gauges for the current height, target height, and progress percentage.
    pub fn record_sync_progress(&self, current_height: i64, target_height: i64) {
        metrics::gauge!("sync_current_height", current_height as f64);
        metrics::gauge!("sync_target_height", target_height as f64);

        let progress = if target_height > 0 {
            (current_height as f64 / target_height as f64) * 100.0
        } else {
            0.0
        };
        metrics::gauge!("sync_progress_percentage", progress);
    }
}
