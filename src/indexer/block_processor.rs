use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::abi;
use crate::db::models::{
    AddressEntry, Block, Transaction, TransactionLog, TX_STATUS_FAILED, TX_STATUS_PENDING,
    TX_STATUS_SUCCESS,
};
use crate::db::storage::Storage;
use crate::eth_rpc::{
    hex_to_i64, hex_to_u256, is_network_error, ChainRpc, RpcBlock, RpcLog, RpcReceipt,
    RpcTransaction,
};
use crate::indexer::tokens::TokenProcessor;
use crate::indexer::trace::Tracer;
use crate::metrics::Metrics;

const CONCURRENT_TRANSACTIONS: usize = 10;

/// Fetches, normalizes, and persists one block at a time: the block row, its
/// transactions and logs, token transfers via the [`TokenProcessor`], and a
/// deferred balance refresh for every address the block touched.
pub struct BlockProcessor {
    storage: Arc<dyn Storage>,
    rpc: Arc<dyn ChainRpc>,
    tokens: Arc<TokenProcessor>,
    tracer: Arc<Tracer>,
    trace_enabled: bool,
    metrics: Metrics,
}

impl BlockProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        rpc: Arc<dyn ChainRpc>,
        tokens: Arc<TokenProcessor>,
        tracer: Arc<Tracer>,
        trace_enabled: bool,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            rpc,
            tokens,
            tracer,
            trace_enabled,
            metrics,
        }
    }

    /// Index one block. Per-transaction errors are logged and skipped;
    /// network-class errors propagate so the orchestrator can recover.
    /// Returns the number of transactions indexed.
    pub async fn process_block(&self, number: i64) -> Result<u64> {
        let start = Instant::now();

        let rpc_block = self
            .rpc
            .get_block_with_txs(number)
            .await
            .with_context(|| format!("fetching block {number}"))?
            .ok_or_else(|| anyhow!("block {number} not found on chain"))?;

        let block = normalize_block(&rpc_block)?;
        self.storage.upsert_block(&block).await?;

        let mut touched: HashSet<String> = HashSet::new();
        if let Some(miner) = &block.miner {
            touched.insert(miner.clone());
        }

        let tx_futures: Vec<_> = rpc_block
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| self.process_transaction(&block, index as i64, tx))
            .collect();
        let outcomes = stream::iter(tx_futures)
            .buffer_unordered(CONCURRENT_TRANSACTIONS)
            .collect::<Vec<_>>()
            .await;

        let mut tx_count = 0u64;
        for outcome in outcomes {
            touched.extend(outcome?);
            tx_count += 1;
        }

        self.refresh_addresses(&touched, number).await;

        if let Err(e) = self
            .storage
            .bump_daily_stats(block.timestamp.date_naive(), 1, block.transaction_count)
            .await
        {
            debug!("failed to bump daily stats for block {}: {:#}", number, e);
        }

        self.metrics.record_block_processing_time(start.elapsed());
        Ok(tx_count)
    }

    /// Returns the addresses this transaction touched. Only network-class
    /// errors abort the block.
    async fn process_transaction(
        &self,
        block: &Block,
        index: i64,
        raw: &RpcTransaction,
    ) -> Result<Vec<String>> {
        let Some(hash) = raw.hash.clone() else {
            warn!("transaction without hash in block {}, skipping", block.number);
            return Ok(Vec::new());
        };

        // some providers return partial bodies inside blocks; refetch then
        let raw = if raw.from.is_none() {
            match self.rpc.get_transaction(&hash).await {
                Ok(Some(full)) => full,
                Ok(None) => raw.clone(),
                Err(e) if e.is_network() => {
                    return Err(anyhow!(e).context(format!("refetching transaction {hash}")))
                }
                Err(_) => raw.clone(),
            }
        } else {
            raw.clone()
        };

        let receipt = match self.rpc.get_transaction_receipt(&hash).await {
            Ok(receipt) => receipt,
            Err(e) if e.is_network() => {
                return Err(anyhow!(e).context(format!("fetching receipt for {hash}")))
            }
            Err(e) => {
                warn!("receipt fetch failed for {}: {}", hash, e);
                None
            }
        };

        let tx = normalize_transaction(block, index, &hash, &raw, receipt.as_ref());
        self.storage.upsert_transaction(&tx).await?;

        let mut touched = vec![tx.from_address.clone()];
        touched.extend(tx.to_address.clone());
        touched.extend(tx.contract_address.clone());

        if let Some(receipt) = &receipt {
            let results = join_all(
                receipt
                    .logs
                    .iter()
                    .map(|raw_log| self.process_log(block.number, &hash, raw_log)),
            )
            .await;
            for result in results {
                match result {
                    Ok(Some(emitter)) => touched.push(emitter),
                    Ok(None) => {}
                    Err(e) if is_network_error(&e) => return Err(e),
                    Err(e) => warn!("error indexing log of {}: {:#}", hash, e),
                }
            }
        }

        if self.trace_enabled {
            if let Some(rows) = self.tracer.trace(&hash, block.number).await {
                if !rows.is_empty() {
                    if let Err(e) = self.storage.insert_internal_transactions(&rows).await {
                        warn!("failed to persist internal transactions of {}: {:#}", hash, e);
                    }
                }
            }
        }

        Ok(touched)
    }

    /// Persist the log and run transfer extraction. Returns the emitting
    /// address for the touched-address set.
    async fn process_log(
        &self,
        block_number: i64,
        tx_hash: &str,
        raw: &RpcLog,
    ) -> Result<Option<String>> {
        let Some(log) = normalize_log(block_number, tx_hash, raw) else {
            warn!("skipping malformed log in {}", tx_hash);
            return Ok(None);
        };

        self.storage.upsert_log(&log).await?;

        if let Err(e) = self.tokens.process_log(&log).await {
            if is_network_error(&e) {
                return Err(e);
            }
            warn!(
                "transfer extraction failed for {} log {}: {:#}",
                tx_hash, log.log_index, e
            );
        }

        Ok(Some(log.address))
    }

    /// Deferred batch refresh of every address the block touched. Best
    /// effort: a failed refresh is retried the next time the address moves.
    async fn refresh_addresses(&self, addresses: &HashSet<String>, block_number: i64) {
        join_all(addresses.iter().map(|address| async move {
            if let Err(e) = self.refresh_address(address, block_number).await {
                debug!("address refresh failed for {}: {:#}", address, e);
            }
        }))
        .await;
    }

    async fn refresh_address(&self, address: &str, block_number: i64) -> Result<()> {
        let balance = self.rpc.get_balance(address).await?;
        let code = self.rpc.get_code(address).await?;
        self.storage
            .upsert_address(&AddressEntry {
                address: address.to_lowercase(),
                balance: balance.to_string(),
                is_contract: code.len() > 2,
                transaction_count: 0,
                last_seen_block: block_number,
            })
            .await
    }
}

fn normalize_block(raw: &RpcBlock) -> Result<Block> {
    let number = raw
        .number
        .as_deref()
        .and_then(hex_to_i64)
        .context("block missing number")?;
    let hash = raw.hash.clone().context("block missing hash")?.to_lowercase();
    let parent_hash = raw
        .parent_hash
        .clone()
        .context("block missing parent hash")?
        .to_lowercase();
    let timestamp_secs = raw.timestamp.as_deref().and_then(hex_to_i64).unwrap_or(0);

    Ok(Block {
        number,
        hash,
        parent_hash,
        timestamp: DateTime::<Utc>::from_timestamp(timestamp_secs, 0).unwrap_or_default(),
        miner: raw.miner.as_deref().map(str::to_lowercase),
        gas_used: raw.gas_used.as_deref().and_then(hex_to_i64).unwrap_or(0),
        gas_limit: raw.gas_limit.as_deref().and_then(hex_to_i64).unwrap_or(0),
        base_fee_per_gas: raw
            .base_fee_per_gas
            .as_deref()
            .and_then(hex_to_u256)
            .map(|fee| fee.to_string()),
        transaction_count: raw.transactions.len() as i64,
    })
}

fn normalize_transaction(
    block: &Block,
    fallback_index: i64,
    hash: &str,
    raw: &RpcTransaction,
    receipt: Option<&RpcReceipt>,
) -> Transaction {
    let input = raw.input.clone().unwrap_or_else(|| "0x".to_string());
    let method_id = abi::method_id(&input);
    let method_name = method_id
        .as_deref()
        .and_then(abi::method_name)
        .map(String::from);

    let status = match receipt {
        None => TX_STATUS_PENDING,
        Some(r) => match r.status.as_deref().and_then(hex_to_i64) {
            Some(0) => TX_STATUS_FAILED,
            // pre-Byzantium receipts carry no status field
            _ => TX_STATUS_SUCCESS,
        },
    };

    let gas_price = receipt
        .and_then(|r| r.effective_gas_price.as_deref())
        .or(raw.gas_price.as_deref())
        .and_then(hex_to_u256)
        .map(|price| price.to_string());

    Transaction {
        hash: hash.to_lowercase(),
        block_number: block.number,
        transaction_index: raw
            .transaction_index
            .as_deref()
            .and_then(hex_to_i64)
            .unwrap_or(fallback_index),
        from_address: raw
            .from
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| abi::ZERO_ADDRESS.to_string()),
        to_address: raw.to.as_deref().map(str::to_lowercase),
        contract_address: receipt
            .and_then(|r| r.contract_address.as_deref())
            .map(str::to_lowercase),
        value: raw
            .value
            .as_deref()
            .and_then(hex_to_u256)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "0".to_string()),
        gas: raw.gas.as_deref().and_then(hex_to_i64).unwrap_or(0),
        gas_price,
        input,
        status: status.to_string(),
        method_id,
        method_name,
    }
}

fn normalize_log(block_number: i64, tx_hash: &str, raw: &RpcLog) -> Option<TransactionLog> {
    let address = raw.address.as_deref()?.to_lowercase();
    let log_index = raw.log_index.as_deref().and_then(hex_to_i64)?;
    let topics: Vec<String> = raw.topics.iter().map(|t| t.to_lowercase()).collect();

    Some(TransactionLog {
        transaction_hash: tx_hash.to_lowercase(),
        log_index,
        block_number,
        address,
        topic0: topics.first().cloned(),
        topics,
        data: raw.data.clone().unwrap_or_else(|| "0x".to_string()),
    })
}
