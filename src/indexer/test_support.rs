//! In-memory fakes for the storage and RPC seams, shared by the indexer's
//! unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::config::{IndexerSettings, NftSettings};
use crate::db::models::{
    AddressEntry, Block, IndexerState, InternalTransaction, NetworkStats, NftToken, Token,
    TokenHolder, TokenTransfer, Transaction, TransactionLog,
};
use crate::db::storage::{ChainCounts, DeletedCounts, Storage};
use crate::eth_rpc::{
    ChainRpc, RpcBlock, RpcBlockHeader, RpcError, RpcLog, RpcReceipt, RpcTransaction, TraceFrame,
};
use crate::indexer::sync::Indexer;

#[derive(Debug, Clone, Default)]
pub(crate) struct MockState {
    pub blocks: BTreeMap<i64, Block>,
    pub transactions: BTreeMap<String, Transaction>,
    pub logs: BTreeMap<(String, i64), TransactionLog>,
    pub transfers: BTreeMap<(String, i64), TokenTransfer>,
    pub tokens: BTreeMap<String, Token>,
    pub holders: BTreeMap<(String, String, String), TokenHolder>,
    pub nfts: BTreeMap<(String, String), NftToken>,
    pub internal_txs: BTreeMap<(String, String), InternalTransaction>,
    pub addresses: BTreeMap<String, AddressEntry>,
    pub indexer_state: Option<(i64, bool, Option<String>)>,
    pub network_stats: Option<NetworkStats>,
    pub daily: BTreeMap<NaiveDate, (i64, i64)>,
}

#[derive(Debug, Default)]
pub(crate) struct MockStorage {
    inner: Mutex<MockState>,
}

impl MockStorage {
    pub fn state(&self) -> MockState {
        self.inner.lock().unwrap().clone()
    }

    pub fn seed_block(&self, block: Block) {
        self.inner.lock().unwrap().blocks.insert(block.number, block);
    }

    pub fn seed_indexer_state(&self, cursor: i64) {
        self.inner.lock().unwrap().indexer_state = Some((cursor, false, None));
    }

    pub fn seed_transfer_at_height(&self, block_number: i64) {
        let transfer = TokenTransfer {
            transaction_hash: format!("0xseed{block_number}"),
            log_index: 0,
            block_number,
            token_address: "0x00000000000000000000000000000000000a11ce".to_string(),
            from_address: "0xaaaa000000000000000000000000000000000001".to_string(),
            to_address: "0xbbbb000000000000000000000000000000000002".to_string(),
            value: Some("1".to_string()),
            token_id: None,
            token_type: "erc20".to_string(),
        };
        self.inner
            .lock()
            .unwrap()
            .transfers
            .insert((transfer.transaction_hash.clone(), 0), transfer);
    }
}

fn holder_key(holder: &TokenHolder) -> (String, String, String) {
    (
        holder.token_address.clone(),
        holder.holder_address.clone(),
        holder.token_id.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl Storage for MockStorage {
    async fn upsert_block(&self, block: &Block) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .insert(block.number, block.clone());
        Ok(())
    }

    async fn get_block(&self, number: i64) -> Result<Option<Block>> {
        Ok(self.inner.lock().unwrap().blocks.get(&number).cloned())
    }

    async fn max_block_number(&self) -> Result<Option<i64>> {
        Ok(self.inner.lock().unwrap().blocks.keys().max().copied())
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .transactions
            .insert(tx.hash.clone(), tx.clone());
        Ok(())
    }

    async fn upsert_log(&self, log: &TransactionLog) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .logs
            .insert((log.transaction_hash.clone(), log.log_index), log.clone());
        Ok(())
    }

    async fn upsert_token_transfer(&self, transfer: &TokenTransfer) -> Result<bool> {
        let key = (transfer.transaction_hash.clone(), transfer.log_index);
        let mut inner = self.inner.lock().unwrap();
        if inner.transfers.contains_key(&key) {
            return Ok(false);
        }
        inner.transfers.insert(key, transfer.clone());
        Ok(true)
    }

    async fn get_token(&self, address: &str) -> Result<Option<Token>> {
        Ok(self.inner.lock().unwrap().tokens.get(address).cloned())
    }

    async fn upsert_token(&self, token: &Token) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tokens.get_mut(&token.address) {
            Some(existing) => {
                existing.name = token.name.clone().or_else(|| existing.name.take());
                existing.symbol = token.symbol.clone().or_else(|| existing.symbol.take());
                existing.decimals = token.decimals.or(existing.decimals);
                existing.total_supply = token
                    .total_supply
                    .clone()
                    .or_else(|| existing.total_supply.take());
                existing.token_type = token.token_type.clone();
            }
            None => {
                inner.tokens.insert(token.address.clone(), token.clone());
            }
        }
        Ok(())
    }

    async fn increment_token_transfer_count(&self, address: &str) -> Result<()> {
        if let Some(token) = self.inner.lock().unwrap().tokens.get_mut(address) {
            token.transfer_count += 1;
        }
        Ok(())
    }

    async fn upsert_token_holder(&self, holder: &TokenHolder) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .holders
            .insert(holder_key(holder), holder.clone());
        Ok(())
    }

    async fn count_positive_holders(&self, token_address: &str) -> Result<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .holders
            .values()
            .filter(|h| h.token_address == token_address && h.balance != "0")
            .count() as i64)
    }

    async fn set_token_holder_count(&self, token_address: &str, count: i64) -> Result<()> {
        if let Some(token) = self.inner.lock().unwrap().tokens.get_mut(token_address) {
            token.holder_count = count;
        }
        Ok(())
    }

    async fn tokens_missing_metadata(&self) -> Result<Vec<Token>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tokens
            .values()
            .filter(|t| t.name.is_none() && t.symbol.is_none())
            .cloned()
            .collect())
    }

    async fn get_holdings(&self, holder_address: &str) -> Result<Vec<TokenHolder>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .holders
            .values()
            .filter(|h| h.holder_address == holder_address && h.balance != "0")
            .cloned()
            .collect())
    }

    async fn upsert_nft(&self, nft: &NftToken) -> Result<()> {
        self.inner.lock().unwrap().nfts.insert(
            (nft.contract_address.clone(), nft.token_id.clone()),
            nft.clone(),
        );
        Ok(())
    }

    async fn insert_internal_transactions(&self, rows: &[InternalTransaction]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for row in rows {
            inner
                .internal_txs
                .entry((row.transaction_hash.clone(), row.trace_address.clone()))
                .or_insert_with(|| row.clone());
        }
        Ok(())
    }

    async fn upsert_address(&self, entry: &AddressEntry) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .addresses
            .insert(entry.address.clone(), entry.clone());
        Ok(())
    }

    async fn get_indexer_state(&self) -> Result<Option<IndexerState>> {
        Ok(self.inner.lock().unwrap().indexer_state.as_ref().map(
            |(cursor, running, error)| IndexerState {
                last_indexed_block: *cursor,
                is_running: *running,
                last_error: error.clone(),
                updated_at: DateTime::<Utc>::default(),
            },
        ))
    }

    async fn update_indexer_state(
        &self,
        last_indexed_block: i64,
        is_running: bool,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.inner.lock().unwrap().indexer_state =
            Some((last_indexed_block, is_running, last_error.map(String::from)));
        Ok(())
    }

    async fn delete_from_height(&self, height: i64) -> Result<DeletedCounts> {
        let mut inner = self.inner.lock().unwrap();
        let mut counts = DeletedCounts::default();

        let before = inner.blocks.len();
        inner.blocks.retain(|&n, _| n < height);
        counts.blocks = (before - inner.blocks.len()) as u64;

        let before = inner.transactions.len();
        inner.transactions.retain(|_, tx| tx.block_number < height);
        counts.transactions = (before - inner.transactions.len()) as u64;

        let before = inner.logs.len();
        inner.logs.retain(|_, log| log.block_number < height);
        counts.logs = (before - inner.logs.len()) as u64;

        let before = inner.transfers.len();
        inner.transfers.retain(|_, t| t.block_number < height);
        counts.token_transfers = (before - inner.transfers.len()) as u64;

        let before = inner.internal_txs.len();
        inner.internal_txs.retain(|_, t| t.block_number < height);
        counts.internal_transactions = (before - inner.internal_txs.len()) as u64;

        Ok(counts)
    }

    async fn chain_counts(&self) -> Result<ChainCounts> {
        let inner = self.inner.lock().unwrap();
        Ok(ChainCounts {
            total_transactions: inner.transactions.len() as i64,
            total_addresses: inner.addresses.len() as i64,
        })
    }

    async fn update_network_stats(&self, stats: &NetworkStats) -> Result<()> {
        self.inner.lock().unwrap().network_stats = Some(stats.clone());
        Ok(())
    }

    async fn bump_daily_stats(&self, day: NaiveDate, blocks: i64, transactions: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.daily.entry(day).or_insert((0, 0));
        entry.0 += blocks;
        entry.1 += transactions;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockRpc {
    blocks: Mutex<BTreeMap<i64, RpcBlock>>,
    receipts: Mutex<BTreeMap<String, RpcReceipt>>,
    balances: Mutex<BTreeMap<String, U256>>,
    call_results: Mutex<BTreeMap<(String, String), String>>,
    traces: Mutex<BTreeMap<String, TraceFrame>>,
    head: AtomicI64,
    probe_failures_left: AtomicU32,
    block_number_failures_left: AtomicU32,
    probes: AtomicU32,
    reconnects: AtomicU32,
}

impl MockRpc {
    pub fn new(head: i64) -> Self {
        let rpc = Self::default();
        rpc.head.store(head, Ordering::SeqCst);
        rpc
    }

    pub fn insert_block(&self, block: RpcBlock) {
        let number = block
            .number
            .as_deref()
            .and_then(crate::eth_rpc::hex_to_i64)
            .expect("mock block must carry a number");
        self.blocks.lock().unwrap().insert(number, block);
    }

    pub fn insert_receipt(&self, tx_hash: &str, logs: Vec<RpcLog>) {
        self.receipts.lock().unwrap().insert(
            tx_hash.to_string(),
            RpcReceipt {
                status: Some("0x1".to_string()),
                contract_address: None,
                gas_used: Some("0x5208".to_string()),
                effective_gas_price: Some("0x3b9aca00".to_string()),
                logs,
            },
        );
    }

    pub fn set_balance(&self, address: &str, balance: U256) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), balance);
    }

    pub fn set_call_result(&self, to: &str, data: &str, result: &str) {
        self.call_results
            .lock()
            .unwrap()
            .insert((to.to_string(), data.to_string()), result.to_string());
    }

    pub fn clear_call_results(&self) {
        self.call_results.lock().unwrap().clear();
    }

    pub fn set_trace(&self, tx_hash: &str, frame: TraceFrame) {
        self.traces
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), frame);
    }

    pub fn fail_probes(&self, count: u32) {
        self.probe_failures_left.store(count, Ordering::SeqCst);
    }

    pub fn fail_block_numbers(&self, count: u32) {
        self.block_number_failures_left
            .store(count, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn block_number(&self) -> Result<i64, RpcError> {
        if Self::take_failure(&self.block_number_failures_left) {
            return Err(RpcError::Network("connection refused".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_block_with_txs(&self, number: i64) -> Result<Option<RpcBlock>, RpcError> {
        Ok(self.blocks.lock().unwrap().get(&number).cloned())
    }

    async fn get_block_header(&self, number: i64) -> Result<Option<RpcBlockHeader>, RpcError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&number)
            .map(|block| RpcBlockHeader {
                number: block.number.clone(),
                hash: block.hash.clone(),
                parent_hash: block.parent_hash.clone(),
            }))
    }

    async fn get_transaction(&self, _hash: &str) -> Result<Option<RpcTransaction>, RpcError> {
        Ok(None)
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RpcReceipt>, RpcError> {
        Ok(self.receipts.lock().unwrap().get(hash).cloned())
    }

    async fn get_balance(&self, address: &str) -> Result<U256, RpcError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn get_code(&self, _address: &str) -> Result<String, RpcError> {
        Ok("0x".to_string())
    }

    async fn call(&self, to: &str, data: &str) -> Result<String, RpcError> {
        Ok(self
            .call_results
            .lock()
            .unwrap()
            .get(&(to.to_string(), data.to_string()))
            .cloned()
            .unwrap_or_else(|| "0x".to_string()))
    }

    async fn trace_transaction(&self, hash: &str) -> Result<TraceFrame, RpcError> {
        self.traces
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or(RpcError::Rpc {
                code: -32601,
                message: "method not found".into(),
            })
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn probe(&self) -> Result<(), RpcError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.probe_failures_left) {
            return Err(RpcError::Network("connection refused".into()));
        }
        Ok(())
    }

    async fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn rpc_block(number: i64, hash: &str, parent_hash: &str) -> RpcBlock {
    RpcBlock {
        number: Some(format!("0x{number:x}")),
        hash: Some(hash.to_string()),
        parent_hash: Some(parent_hash.to_string()),
        timestamp: Some("0x6553f100".to_string()),
        miner: None,
        gas_used: Some("0x5208".to_string()),
        gas_limit: Some("0x1c9c380".to_string()),
        base_fee_per_gas: None,
        transactions: Vec::new(),
    }
}

pub(crate) fn stored_block(number: i64, hash: &str, parent_hash: &str) -> Block {
    Block {
        number,
        hash: hash.to_string(),
        parent_hash: parent_hash.to_string(),
        timestamp: DateTime::<Utc>::default(),
        miner: None,
        gas_used: 21_000,
        gas_limit: 30_000_000,
        base_fee_per_gas: None,
        transaction_count: 0,
    }
}

pub(crate) fn rpc_transaction(hash: &str, from: &str) -> RpcTransaction {
    RpcTransaction {
        hash: Some(hash.to_string()),
        from: Some(from.to_string()),
        to: Some("0xbbbb000000000000000000000000000000000002".to_string()),
        value: Some("0x0".to_string()),
        gas: Some("0x5208".to_string()),
        gas_price: Some("0x3b9aca00".to_string()),
        input: Some("0x".to_string()),
        transaction_index: Some("0x0".to_string()),
    }
}

pub(crate) fn rpc_log(address: &str, log_index: i64, topics: &[&str]) -> RpcLog {
    RpcLog {
        address: Some(address.to_string()),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        data: Some("0x".to_string()),
        log_index: Some(format!("0x{log_index:x}")),
    }
}

pub(crate) fn log_with_topics(address: &str, topics: &[&str], data: &str) -> TransactionLog {
    let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
    TransactionLog {
        transaction_hash: "0xtx".to_string(),
        log_index: 0,
        block_number: 1,
        address: address.to_string(),
        topic0: topics.first().cloned(),
        topics,
        data: data.to_string(),
    }
}

pub(crate) fn test_settings() -> IndexerSettings {
    IndexerSettings {
        batch_size: 5,
        min_batch_size: 1,
        max_batch_size: 50,
        batch_size_step: 5,
        parallel_blocks: 2,
        poll_interval_secs: 1,
        reorg_depth: 12,
        start_lookback: 100,
        error_retry_delay_secs: 1,
        max_consecutive_errors: 5,
        trace_internal_transactions: false,
    }
}

pub(crate) fn test_nft_settings() -> NftSettings {
    NftSettings {
        ipfs_gateway: "https://ipfs.io/ipfs/".to_string(),
        item_delay_ms: 0,
        http_timeout_secs: 1,
    }
}

pub(crate) fn test_indexer(storage: Arc<MockStorage>, rpc: Arc<MockRpc>) -> Arc<Indexer> {
    Indexer::new(storage, rpc, test_settings(), test_nft_settings())
}
