use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub eth_node: EthNodeSettings,
    pub indexer: IndexerSettings,
    pub nft: NftSettings,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct EthNodeSettings {
    pub url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_batch_size_step")]
    pub batch_size_step: usize,
    #[serde(default = "default_parallel_blocks")]
    pub parallel_blocks: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reorg_depth")]
    pub reorg_depth: i64,
    #[serde(default = "default_start_lookback")]
    pub start_lookback: i64,
    #[serde(default = "default_error_retry_delay")]
    pub error_retry_delay_secs: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_trace_internal")]
    pub trace_internal_transactions: bool,
}

fn default_batch_size() -> usize {
    10
}

fn default_min_batch_size() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    50
}

fn default_batch_size_step() -> usize {
    5
}

fn default_parallel_blocks() -> usize {
    5
}

fn default_poll_interval() -> u64 {
    5
}

fn default_reorg_depth() -> i64 {
    12
}

fn default_start_lookback() -> i64 {
    100
}

fn default_error_retry_delay() -> u64 {
    5
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_trace_internal() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NftSettings {
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_ipfs_gateway() -> String {
    "https://ipfs.io/ipfs/".to_string()
}

fn default_item_delay_ms() -> u64 {
    500
}

fn default_http_timeout() -> u64 {
    10
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(Environment::default().separator("__"))
            .set_default("indexer.batch_size", 10)?
            .set_default("indexer.parallel_blocks", 5)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .build()?;

        config.try_deserialize()
    }
}
