pub mod abi;
pub mod config;
pub mod db;
pub mod eth_rpc;
pub mod indexer;
pub mod metrics;

pub use config::Settings;
pub use db::models::{Block, Token, TokenTransfer, Transaction};
pub use db::storage::Storage;
pub use eth_rpc::{ChainRpc, EthRpcClient, RpcError};
pub use indexer::Indexer;
