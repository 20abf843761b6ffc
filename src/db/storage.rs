use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use super::models::{
    AddressEntry, Block, IndexerState, InternalTransaction, NetworkStats, NftToken, Token,
    TokenHolder, TokenTransfer, Transaction, TransactionLog,
};

/// Rows removed by a reorg rollback, by table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedCounts {
    pub blocks: u64,
    pub transactions: u64,
    pub logs: u64,
    pub token_transfers: u64,
    pub internal_transactions: u64,
}

impl DeletedCounts {
    pub fn total(&self) -> u64 {
        self.blocks + self.transactions + self.logs + self.token_transfers
            + self.internal_transactions
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChainCounts {
    pub total_transactions: i64,
    pub total_addresses: i64,
}

/// Persistence seam for everything the indexer writes and reads. The
/// production implementation is [`super::postgres::PgStorage`]; tests run
/// against an in-memory fake.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upsert_block(&self, block: &Block) -> Result<()>;
    async fn get_block(&self, number: i64) -> Result<Option<Block>>;
    async fn max_block_number(&self) -> Result<Option<i64>>;

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<()>;
    async fn upsert_log(&self, log: &TransactionLog) -> Result<()>;

    /// Returns true when the transfer was newly inserted (idempotent by
    /// (transaction_hash, log_index)).
    async fn upsert_token_transfer(&self, transfer: &TokenTransfer) -> Result<bool>;
    async fn get_token(&self, address: &str) -> Result<Option<Token>>;
    async fn upsert_token(&self, token: &Token) -> Result<()>;
    async fn increment_token_transfer_count(&self, address: &str) -> Result<()>;
    async fn upsert_token_holder(&self, holder: &TokenHolder) -> Result<()>;
    async fn count_positive_holders(&self, token_address: &str) -> Result<i64>;
    async fn set_token_holder_count(&self, token_address: &str, count: i64) -> Result<()>;
    async fn tokens_missing_metadata(&self) -> Result<Vec<Token>>;
    async fn get_holdings(&self, holder_address: &str) -> Result<Vec<TokenHolder>>;

    async fn upsert_nft(&self, nft: &NftToken) -> Result<()>;
    async fn insert_internal_transactions(&self, rows: &[InternalTransaction]) -> Result<()>;
    async fn upsert_address(&self, entry: &AddressEntry) -> Result<()>;

    async fn get_indexer_state(&self) -> Result<Option<IndexerState>>;
    async fn update_indexer_state(
        &self,
        last_indexed_block: i64,
        is_running: bool,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Remove every row derived from blocks at `height` and above, in one
    /// atomic transaction. Partial deletion would corrupt holder balances.
    async fn delete_from_height(&self, height: i64) -> Result<DeletedCounts>;

    async fn chain_counts(&self) -> Result<ChainCounts>;
    async fn update_network_stats(&self, stats: &NetworkStats) -> Result<()>;
    async fn bump_daily_stats(&self, day: NaiveDate, blocks: i64, transactions: i64) -> Result<()>;
}
