use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{IndexerSettings, NftSettings};
use crate::db::models::{NetworkStats, TokenHolder};
use crate::db::storage::Storage;
use crate::eth_rpc::{is_network_error, ChainRpc};
use crate::indexer::block_processor::BlockProcessor;
use crate::indexer::nft::NftPipeline;
use crate::indexer::tokens::TokenProcessor;
use crate::indexer::trace::Tracer;
use crate::metrics::Metrics;

const RECOVERY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECOVERY_MAX_DELAY: Duration = Duration::from_secs(60);
const RECOVERY_BACKOFF: f64 = 1.5;

/// Additive-increase/multiplicative-decrease batch sizing: three consecutive
/// chunk successes grow the batch by a fixed step, two consecutive failures
/// halve it. The size never leaves [min, max].
#[derive(Debug)]
pub(crate) struct BatchController {
    size: usize,
    min: usize,
    max: usize,
    step: usize,
    successes: u32,
    failures: u32,
}

impl BatchController {
    pub(crate) fn new(initial: usize, min: usize, max: usize, step: usize) -> Self {
        Self {
            size: initial.clamp(min, max),
            min,
            max,
            step,
            successes: 0,
            failures: 0,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn record_success(&mut self) {
        self.failures = 0;
        self.successes += 1;
        if self.successes >= 3 {
            self.successes = 0;
            self.size = (self.size + self.step).min(self.max);
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.successes = 0;
        self.failures += 1;
        if self.failures >= 2 {
            self.failures = 0;
            self.size = (self.size / 2).max(self.min);
        }
    }
}

/// The sync orchestrator. Owns the cursor and target heights, drives block
/// ingestion with adaptive batching, detects reorgs when caught up, and
/// survives upstream outages via the recovery loop. Constructed with its
/// storage and RPC dependencies injected; multiple independent instances can
/// coexist.
pub struct Indexer {
    storage: Arc<dyn Storage>,
    rpc: Arc<dyn ChainRpc>,
    processor: BlockProcessor,
    tokens: Arc<TokenProcessor>,
    tracer: Arc<Tracer>,
    settings: IndexerSettings,
    metrics: Metrics,
    running: AtomicBool,
    stop_requested: AtomicBool,
    current_block: AtomicI64,
    target_block: AtomicI64,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    _nft_consumer: JoinHandle<()>,
}

impl Indexer {
    pub fn new(
        storage: Arc<dyn Storage>,
        rpc: Arc<dyn ChainRpc>,
        settings: IndexerSettings,
        nft_settings: NftSettings,
    ) -> Arc<Self> {
        let metrics = Metrics::new();

        let pipeline = NftPipeline::new(Arc::clone(&storage), Arc::clone(&rpc), &nft_settings);
        let (nft_queue, nft_consumer) = pipeline.spawn();

        let tokens = Arc::new(TokenProcessor::new(
            Arc::clone(&storage),
            Arc::clone(&rpc),
            nft_queue,
            metrics.clone(),
        ));
        let tracer = Arc::new(Tracer::new(Arc::clone(&rpc)));
        let processor = BlockProcessor::new(
            Arc::clone(&storage),
            Arc::clone(&rpc),
            Arc::clone(&tokens),
            Arc::clone(&tracer),
            settings.trace_internal_transactions,
            metrics.clone(),
        );

        Arc::new(Self {
            storage,
            rpc,
            processor,
            tokens,
            tracer,
            settings,
            metrics,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            current_block: AtomicI64::new(0),
            target_block: AtomicI64::new(0),
            loop_handle: Mutex::new(None),
            _nft_consumer: nft_consumer,
        })
    }

    /// Launch the sync loop. Calling start while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("indexer already running, ignoring start");
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        if let Ok(mut slot) = self.loop_handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Request a cooperative stop. In-flight chunk work completes so the
    /// cursor only ever advances over fully ingested chunks.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub async fn wait_until_stopped(&self) {
        let handle = self.loop_handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("sync loop task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_block(&self) -> i64 {
        self.current_block.load(Ordering::SeqCst)
    }

    pub fn target_block(&self) -> i64 {
        self.target_block.load(Ordering::SeqCst)
    }

    /// Retry metadata reads for tokens that were indexed without any.
    pub async fn backfill_token_metadata(&self) -> Result<usize> {
        self.tokens.backfill_token_metadata().await
    }

    /// Live token balances for one address, reusing the shared RPC client.
    pub async fn get_token_balances(&self, address: &str) -> Result<Vec<TokenHolder>> {
        self.tokens.get_token_balances(address).await
    }

    async fn run(self: Arc<Self>) {
        info!("starting sync loop");

        if self.rpc.probe().await.is_err() {
            warn!("rpc endpoint unreachable at startup, waiting for connection");
            if !self.recover_connection().await {
                self.finish(0).await;
                return;
            }
        }

        let persisted = match self.storage.get_indexer_state().await {
            Ok(state) => state.map(|s| s.last_indexed_block).unwrap_or(0),
            Err(e) => {
                error!("failed to load indexer state: {:#}", e);
                0
            }
        };

        let head = loop {
            match self.rpc.block_number().await {
                Ok(head) => break head,
                Err(e) => {
                    warn!("failed to read chain head: {}", e);
                    if !self.recover_connection().await {
                        self.finish(persisted).await;
                        return;
                    }
                }
            }
        };

        // the lookback bounds catch-up time after long downtime while still
        // covering the reorg-detection depth
        let mut cursor = persisted.max((head - self.settings.start_lookback).max(0));
        info!(
            "syncing from block {} (persisted cursor {}, chain head {})",
            cursor, persisted, head
        );
        self.current_block.store(cursor, Ordering::SeqCst);
        self.target_block.store(head, Ordering::SeqCst);
        if let Err(e) = self.storage.update_indexer_state(cursor, true, None).await {
            error!("failed to persist indexer state: {:#}", e);
        }

        let mut batch = BatchController::new(
            self.settings.batch_size,
            self.settings.min_batch_size,
            self.settings.max_batch_size,
            self.settings.batch_size_step,
        );
        let mut consecutive_errors = 0u32;

        'main: loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let head = match self.rpc.block_number().await {
                Ok(head) => head,
                Err(e) => {
                    self.metrics.record_rpc_failure();
                    self.note_error(cursor, &e.to_string()).await;
                    if e.is_network() {
                        if !self.recover_connection().await {
                            break 'main;
                        }
                        cursor = self.post_recovery_check(cursor).await;
                    } else {
                        sleep(self.error_retry_delay()).await;
                    }
                    continue;
                }
            };
            self.target_block.store(head, Ordering::SeqCst);

            if cursor >= head {
                match self.check_for_reorg(cursor).await {
                    Ok(Some(rolled_back_to)) => {
                        cursor = rolled_back_to;
                        self.current_block.store(cursor, Ordering::SeqCst);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("reorg check failed: {:#}", e);
                        if is_network_error(&e) {
                            if !self.recover_connection().await {
                                break 'main;
                            }
                            cursor = self.post_recovery_check(cursor).await;
                        }
                        continue;
                    }
                }
                self.refresh_network_stats(cursor).await;
                self.metrics.record_sync_progress(cursor, head);
                sleep(self.poll_interval()).await;
                continue;
            }

            let end = (cursor + batch.size() as i64).min(head);
            debug!(
                "syncing blocks {} to {} (batch size {})",
                cursor + 1,
                end,
                batch.size()
            );
            let heights: Vec<i64> = (cursor + 1..=end).collect();

            for chunk in heights.chunks(self.settings.parallel_blocks) {
                if self.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                match self.process_chunk(chunk).await {
                    Ok(()) => {
                        let Some(&last) = chunk.last() else { break };
                        cursor = last;
                        consecutive_errors = 0;
                        batch.record_success();
                        self.current_block.store(cursor, Ordering::SeqCst);
                        self.metrics.record_sync_progress(cursor, head);
                        // the durable checkpoint; a crash loses at most the
                        // in-flight chunk, which re-ingests idempotently
                        if let Err(e) =
                            self.storage.update_indexer_state(cursor, true, None).await
                        {
                            error!("failed to checkpoint cursor {}: {:#}", cursor, e);
                        }
                    }
                    Err(e) => {
                        warn!("chunk failed: {:#}", e);
                        batch.record_failure();
                        consecutive_errors += 1;
                        self.metrics.record_rpc_failure();
                        self.note_error(cursor, &format!("{e:#}")).await;
                        if is_network_error(&e)
                            || consecutive_errors >= self.settings.max_consecutive_errors
                        {
                            if !self.recover_connection().await {
                                break 'main;
                            }
                            cursor = self.post_recovery_check(cursor).await;
                            consecutive_errors = 0;
                        } else {
                            sleep(self.error_retry_delay()).await;
                        }
                        // abandon the rest of this batch
                        break;
                    }
                }
            }
        }

        self.finish(cursor).await;
    }

    /// Process one chunk of blocks concurrently. The chunk either fully
    /// succeeds or the whole chunk is retried; network errors are surfaced
    /// in preference to per-block errors so recovery triggers.
    async fn process_chunk(&self, heights: &[i64]) -> Result<()> {
        let results = join_all(heights.iter().map(|&n| self.processor.process_block(n))).await;

        let mut tx_count = 0u64;
        let mut failure: Option<anyhow::Error> = None;
        for (height, result) in heights.iter().zip(results) {
            match result {
                Ok(count) => {
                    tx_count += count;
                    self.metrics.record_block_indexed();
                }
                Err(e) => {
                    error!("error processing block {}: {:#}", height, e);
                    let prefer = failure
                        .as_ref()
                        .map_or(true, |current| !is_network_error(current) && is_network_error(&e));
                    if prefer {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        self.metrics.record_transactions_indexed(tx_count);
        Ok(())
    }

    /// Compare stored hashes against the live chain over the reorg window.
    /// On divergence, delete everything from the fork point in one
    /// transaction and return the new cursor.
    async fn check_for_reorg(&self, cursor: i64) -> Result<Option<i64>> {
        if cursor <= 0 {
            return Ok(None);
        }
        let low = (cursor - self.settings.reorg_depth + 1).max(1);

        let mut divergence: Option<i64> = None;
        for number in low..=cursor {
            let Some(stored) = self.storage.get_block(number).await? else {
                continue;
            };
            let live_hash = self
                .rpc
                .get_block_header(number)
                .await
                .map_err(anyhow::Error::from)?
                .and_then(|header| header.hash);
            let matches = live_hash
                .as_deref()
                .map(|hash| hash.eq_ignore_ascii_case(&stored.hash));
            if matches != Some(true) {
                divergence = Some(number);
                break;
            }
        }

        let Some(divergence) = divergence else {
            return Ok(None);
        };

        warn!("reorg detected at block {}, rolling back", divergence);
        let counts = self.storage.delete_from_height(divergence).await?;
        let new_cursor = divergence - 1;
        self.storage
            .update_indexer_state(new_cursor, true, None)
            .await?;
        self.metrics.record_reorg(cursor - new_cursor);
        info!(
            "rolled back {} rows from block {}, cursor reset to {}",
            counts.total(),
            divergence,
            new_cursor
        );
        Ok(Some(new_cursor))
    }

    /// Rebuild the transport and probe with exponential backoff until the
    /// endpoint answers. Returns false only when a stop was requested.
    async fn recover_connection(&self) -> bool {
        warn!("waiting for rpc connection...");
        self.rpc.reconnect().await;

        let mut delay = RECOVERY_INITIAL_DELAY;
        let mut attempt = 0u32;
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return false;
            }
            attempt += 1;
            match self.rpc.probe().await {
                Ok(()) => {
                    info!("rpc connection restored after {} probes", attempt);
                    // the replacement node may differ in trace support
                    self.tracer.reset_support();
                    self.metrics.record_recovery();
                    return true;
                }
                Err(e) => {
                    warn!(
                        "probe {} failed: {}, retrying in {:?}",
                        attempt, e, delay
                    );
                    sleep(delay).await;
                    delay = delay.mul_f64(RECOVERY_BACKOFF).min(RECOVERY_MAX_DELAY);
                }
            }
        }
    }

    /// The chain may have advanced or reorganized during downtime.
    async fn post_recovery_check(&self, cursor: i64) -> i64 {
        match self.check_for_reorg(cursor).await {
            Ok(Some(new_cursor)) => new_cursor,
            Ok(None) => cursor,
            Err(e) => {
                warn!("reorg check after recovery failed: {:#}", e);
                cursor
            }
        }
    }

    async fn refresh_network_stats(&self, cursor: i64) {
        let gas_price = self.rpc.gas_price().await.ok().map(|price| price.to_string());
        let latest_block = match self.storage.max_block_number().await {
            Ok(max) => max.unwrap_or(cursor),
            Err(_) => cursor,
        };
        match self.storage.chain_counts().await {
            Ok(counts) => {
                let stats = NetworkStats {
                    latest_block,
                    total_transactions: counts.total_transactions,
                    total_addresses: counts.total_addresses,
                    gas_price,
                    updated_at: Utc::now(),
                };
                if let Err(e) = self.storage.update_network_stats(&stats).await {
                    debug!("failed to update network stats: {:#}", e);
                }
            }
            Err(e) => debug!("failed to read chain counts: {:#}", e),
        }
    }

    async fn note_error(&self, cursor: i64, message: &str) {
        if let Err(e) = self
            .storage
            .update_indexer_state(cursor, true, Some(message))
            .await
        {
            error!("failed to record indexer error: {:#}", e);
        }
    }

    async fn finish(&self, cursor: i64) {
        if let Err(e) = self.storage.update_indexer_state(cursor, false, None).await {
            error!("failed to persist final indexer state: {:#}", e);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("indexer stopped at block {}", cursor);
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.settings.poll_interval_secs)
    }

    fn error_retry_delay(&self) -> Duration {
        Duration::from_secs(self.settings.error_retry_delay_secs)
    }
}
