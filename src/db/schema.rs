use sqlx::PgPool;

/// Idempotent schema bootstrap. Each statement runs separately so a partially
/// created schema converges on retry.
pub async fn initialize_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blocks (
            number BIGINT PRIMARY KEY,
            hash TEXT NOT NULL,
            parent_hash TEXT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            miner TEXT,
            gas_used BIGINT NOT NULL DEFAULT 0,
            gas_limit BIGINT NOT NULL DEFAULT 0,
            base_fee_per_gas TEXT,
            transaction_count BIGINT NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transactions (
            hash TEXT PRIMARY KEY,
            block_number BIGINT NOT NULL,
            transaction_index BIGINT NOT NULL DEFAULT 0,
            from_address TEXT NOT NULL,
            to_address TEXT,
            contract_address TEXT,
            value TEXT NOT NULL DEFAULT '0',
            gas BIGINT NOT NULL DEFAULT 0,
            gas_price TEXT,
            input TEXT NOT NULL DEFAULT '0x',
            status TEXT NOT NULL DEFAULT 'pending',
            method_id TEXT,
            method_name TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transaction_logs (
            transaction_hash TEXT NOT NULL,
            log_index BIGINT NOT NULL,
            block_number BIGINT NOT NULL,
            address TEXT NOT NULL,
            topic0 TEXT,
            topics TEXT[] NOT NULL DEFAULT '{}',
            data TEXT NOT NULL DEFAULT '0x',
            PRIMARY KEY (transaction_hash, log_index)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS token_transfers (
            transaction_hash TEXT NOT NULL,
            log_index BIGINT NOT NULL,
            block_number BIGINT NOT NULL,
            token_address TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            value TEXT,
            token_id TEXT,
            token_type TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tokens (
            address TEXT PRIMARY KEY,
            name TEXT,
            symbol TEXT,
            decimals INTEGER,
            total_supply TEXT,
            token_type TEXT NOT NULL,
            holder_count BIGINT NOT NULL DEFAULT 0,
            transfer_count BIGINT NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS token_holders (
            token_address TEXT NOT NULL,
            holder_address TEXT NOT NULL,
            token_id TEXT,
            balance TEXT NOT NULL DEFAULT '0'
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_token_holders
            ON token_holders (token_address, holder_address, COALESCE(token_id, ''))",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS nft_tokens (
            contract_address TEXT NOT NULL,
            token_id TEXT NOT NULL,
            owner TEXT,
            name TEXT,
            description TEXT,
            image_url TEXT,
            attributes JSONB,
            metadata_uri TEXT,
            PRIMARY KEY (contract_address, token_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS internal_transactions (
            transaction_hash TEXT NOT NULL,
            trace_address TEXT NOT NULL,
            block_number BIGINT NOT NULL,
            from_address TEXT,
            to_address TEXT,
            value TEXT NOT NULL DEFAULT '0',
            call_type TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, trace_address)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS addresses (
            address TEXT PRIMARY KEY,
            balance TEXT NOT NULL DEFAULT '0',
            is_contract BOOLEAN NOT NULL DEFAULT FALSE,
            transaction_count BIGINT NOT NULL DEFAULT 0,
            last_seen_block BIGINT NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS indexer_state (
            id SMALLINT PRIMARY KEY CHECK (id = 1),
            last_indexed_block BIGINT NOT NULL DEFAULT 0,
            is_running BOOLEAN NOT NULL DEFAULT FALSE,
            last_error TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS network_stats (
            id SMALLINT PRIMARY KEY CHECK (id = 1),
            latest_block BIGINT NOT NULL DEFAULT 0,
            total_transactions BIGINT NOT NULL DEFAULT 0,
            total_addresses BIGINT NOT NULL DEFAULT 0,
            gas_price TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS daily_stats (
            day DATE PRIMARY KEY,
            block_count BIGINT NOT NULL DEFAULT 0,
            transaction_count BIGINT NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_block_number
            ON transactions(block_number)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transaction_logs_block_number
            ON transaction_logs(block_number)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transaction_logs_topic0
            ON transaction_logs(topic0)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_token_transfers_block_number
            ON token_transfers(block_number)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_token_transfers_token
            ON token_transfers(token_address)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_token_holders_holder
            ON token_holders(holder_address)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_internal_transactions_block_number
            ON internal_transactions(block_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop every table so a `--reset` run starts from an empty schema.
pub async fn reset_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    for table in [
        "internal_transactions",
        "token_transfers",
        "transaction_logs",
        "transactions",
        "nft_tokens",
        "token_holders",
        "tokens",
        "addresses",
        "blocks",
        "indexer_state",
        "network_stats",
        "daily_stats",
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}
