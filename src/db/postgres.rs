use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use super::models::{
    AddressEntry, Block, IndexerState, InternalTransaction, NetworkStats, NftToken, Token,
    TokenHolder, TokenTransfer, Transaction, TransactionLog,
};
use super::storage::{ChainCounts, DeletedCounts, Storage};

/// Production [`Storage`] backed by Postgres. All writes are keyed upserts so
/// re-indexing a block is idempotent.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn upsert_block(&self, block: &Block) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blocks (number, hash, parent_hash, timestamp, miner,
                                gas_used, gas_limit, base_fee_per_gas, transaction_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (number) DO UPDATE
            SET hash = $2, parent_hash = $3, timestamp = $4, miner = $5,
                gas_used = $6, gas_limit = $7, base_fee_per_gas = $8, transaction_count = $9
            "#,
        )
        .bind(block.number)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(block.timestamp)
        .bind(&block.miner)
        .bind(block.gas_used)
        .bind(block.gas_limit)
        .bind(&block.base_fee_per_gas)
        .bind(block.transaction_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_block(&self, number: i64) -> Result<Option<Block>> {
        let block = sqlx::query_as::<_, Block>(
            r#"
            SELECT number, hash, parent_hash, timestamp, miner,
                   gas_used, gas_limit, base_fee_per_gas, transaction_count
            FROM blocks WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(block)
    }

    async fn max_block_number(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT MAX(number) AS max_number FROM blocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("max_number")?)
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (hash, block_number, transaction_index, from_address,
                                      to_address, contract_address, value, gas, gas_price,
                                      input, status, method_id, method_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (hash) DO UPDATE
            SET block_number = $2, transaction_index = $3, from_address = $4,
                to_address = $5, contract_address = $6, value = $7, gas = $8,
                gas_price = $9, input = $10, status = $11, method_id = $12, method_name = $13
            "#,
        )
        .bind(&tx.hash)
        .bind(tx.block_number)
        .bind(tx.transaction_index)
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(&tx.contract_address)
        .bind(&tx.value)
        .bind(tx.gas)
        .bind(&tx.gas_price)
        .bind(&tx.input)
        .bind(&tx.status)
        .bind(&tx.method_id)
        .bind(&tx.method_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_log(&self, log: &TransactionLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_logs (transaction_hash, log_index, block_number,
                                          address, topic0, topics, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (transaction_hash, log_index) DO UPDATE
            SET block_number = $3, address = $4, topic0 = $5, topics = $6, data = $7
            "#,
        )
        .bind(&log.transaction_hash)
        .bind(log.log_index)
        .bind(log.block_number)
        .bind(&log.address)
        .bind(&log.topic0)
        .bind(&log.topics)
        .bind(&log.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_token_transfer(&self, transfer: &TokenTransfer) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_transfers (transaction_hash, log_index, block_number,
                                         token_address, from_address, to_address,
                                         value, token_id, token_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (transaction_hash, log_index) DO NOTHING
            "#,
        )
        .bind(&transfer.transaction_hash)
        .bind(transfer.log_index)
        .bind(transfer.block_number)
        .bind(&transfer.token_address)
        .bind(&transfer.from_address)
        .bind(&transfer.to_address)
        .bind(&transfer.value)
        .bind(&transfer.token_id)
        .bind(&transfer.token_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_token(&self, address: &str) -> Result<Option<Token>> {
        let token = sqlx::query_as::<_, Token>(
            r#"
            SELECT address, name, symbol, decimals, total_supply, token_type,
                   holder_count, transfer_count
            FROM tokens WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn upsert_token(&self, token: &Token) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (address, name, symbol, decimals, total_supply,
                                token_type, holder_count, transfer_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (address) DO UPDATE
            SET name = COALESCE($2, tokens.name),
                symbol = COALESCE($3, tokens.symbol),
                decimals = COALESCE($4, tokens.decimals),
                total_supply = COALESCE($5, tokens.total_supply),
                token_type = $6
            "#,
        )
        .bind(&token.address)
        .bind(&token.name)
        .bind(&token.symbol)
        .bind(token.decimals)
        .bind(&token.total_supply)
        .bind(&token.token_type)
        .bind(token.holder_count)
        .bind(token.transfer_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_token_transfer_count(&self, address: &str) -> Result<()> {
        sqlx::query("UPDATE tokens SET transfer_count = transfer_count + 1 WHERE address = $1")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_token_holder(&self, holder: &TokenHolder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_holders (token_address, holder_address, token_id, balance)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token_address, holder_address, COALESCE(token_id, '')) DO UPDATE
            SET balance = $4
            "#,
        )
        .bind(&holder.token_address)
        .bind(&holder.holder_address)
        .bind(&holder.token_id)
        .bind(&holder.balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_positive_holders(&self, token_address: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM token_holders WHERE token_address = $1 AND balance::numeric > 0",
        )
        .bind(token_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn set_token_holder_count(&self, token_address: &str, count: i64) -> Result<()> {
        sqlx::query("UPDATE tokens SET holder_count = $2 WHERE address = $1")
            .bind(token_address)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tokens_missing_metadata(&self) -> Result<Vec<Token>> {
        let tokens = sqlx::query_as::<_, Token>(
            r#"
            SELECT address, name, symbol, decimals, total_supply, token_type,
                   holder_count, transfer_count
            FROM tokens WHERE name IS NULL AND symbol IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn get_holdings(&self, holder_address: &str) -> Result<Vec<TokenHolder>> {
        let holders = sqlx::query_as::<_, TokenHolder>(
            r#"
            SELECT token_address, holder_address, token_id, balance
            FROM token_holders
            WHERE holder_address = $1 AND balance::numeric > 0
            "#,
        )
        .bind(holder_address)
        .fetch_all(&self.pool)
        .await?;
        Ok(holders)
    }

    async fn upsert_nft(&self, nft: &NftToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nft_tokens (contract_address, token_id, owner, name, description,
                                    image_url, attributes, metadata_uri)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (contract_address, token_id) DO UPDATE
            SET owner = COALESCE($3, nft_tokens.owner),
                name = COALESCE($4, nft_tokens.name),
                description = COALESCE($5, nft_tokens.description),
                image_url = COALESCE($6, nft_tokens.image_url),
                attributes = COALESCE($7, nft_tokens.attributes),
                metadata_uri = COALESCE($8, nft_tokens.metadata_uri)
            "#,
        )
        .bind(&nft.contract_address)
        .bind(&nft.token_id)
        .bind(&nft.owner)
        .bind(&nft.name)
        .bind(&nft.description)
        .bind(&nft.image_url)
        .bind(&nft.attributes)
        .bind(&nft.metadata_uri)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_internal_transactions(&self, rows: &[InternalTransaction]) -> Result<()> {
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO internal_transactions (transaction_hash, trace_address, block_number,
                                                   from_address, to_address, value, call_type)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (transaction_hash, trace_address) DO NOTHING
                "#,
            )
            .bind(&row.transaction_hash)
            .bind(&row.trace_address)
            .bind(row.block_number)
            .bind(&row.from_address)
            .bind(&row.to_address)
            .bind(&row.value)
            .bind(&row.call_type)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn upsert_address(&self, entry: &AddressEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO addresses (address, balance, is_contract, transaction_count, last_seen_block)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (address) DO UPDATE
            SET balance = $2, is_contract = $3,
                transaction_count = addresses.transaction_count + 1,
                last_seen_block = GREATEST(addresses.last_seen_block, $4)
            "#,
        )
        .bind(&entry.address)
        .bind(&entry.balance)
        .bind(entry.is_contract)
        .bind(entry.last_seen_block)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_indexer_state(&self) -> Result<Option<IndexerState>> {
        let state = sqlx::query_as::<_, IndexerState>(
            "SELECT last_indexed_block, is_running, last_error, updated_at FROM indexer_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn update_indexer_state(
        &self,
        last_indexed_block: i64,
        is_running: bool,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_state (id, last_indexed_block, is_running, last_error, updated_at)
            VALUES (1, $1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE
            SET last_indexed_block = $1, is_running = $2, last_error = $3, updated_at = NOW()
            "#,
        )
        .bind(last_indexed_block)
        .bind(is_running)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_from_height(&self, height: i64) -> Result<DeletedCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = DeletedCounts::default();

        counts.internal_transactions =
            sqlx::query("DELETE FROM internal_transactions WHERE block_number >= $1")
                .bind(height)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        counts.token_transfers = sqlx::query("DELETE FROM token_transfers WHERE block_number >= $1")
            .bind(height)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        counts.logs = sqlx::query("DELETE FROM transaction_logs WHERE block_number >= $1")
            .bind(height)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        counts.transactions = sqlx::query("DELETE FROM transactions WHERE block_number >= $1")
            .bind(height)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        counts.blocks = sqlx::query("DELETE FROM blocks WHERE number >= $1")
            .bind(height)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(counts)
    }

    async fn chain_counts(&self) -> Result<ChainCounts> {
        let total_transactions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        let total_addresses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM addresses")
            .fetch_one(&self.pool)
            .await?;
        Ok(ChainCounts {
            total_transactions,
            total_addresses,
        })
    }

    async fn update_network_stats(&self, stats: &NetworkStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO network_stats (id, latest_block, total_transactions, total_addresses,
                                       gas_price, updated_at)
            VALUES (1, $1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE
            SET latest_block = $1, total_transactions = $2, total_addresses = $3,
                gas_price = $4, updated_at = NOW()
            "#,
        )
        .bind(stats.latest_block)
        .bind(stats.total_transactions)
        .bind(stats.total_addresses)
        .bind(&stats.gas_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bump_daily_stats(&self, day: NaiveDate, blocks: i64, transactions: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_stats (day, block_count, transaction_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (day) DO UPDATE
            SET block_count = daily_stats.block_count + $2,
                transaction_count = daily_stats.transaction_count + $3
            "#,
        )
        .bind(day)
        .bind(blocks)
        .bind(transactions)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
