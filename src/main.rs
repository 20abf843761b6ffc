use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evm_indexer::config::{validate_settings, Settings};
use evm_indexer::db::{schema, PgStorage};
use evm_indexer::eth_rpc::EthRpcClient;
use evm_indexer::indexer::Indexer;
use evm_indexer::metrics;

#[derive(Parser)]
struct Args {
    /// Reset the database before starting the sync
    #[arg(long)]
    reset: bool,

    /// Retry metadata reads for tokens indexed without any, then exit
    #[arg(long)]
    backfill_metadata: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        error!("Failed to load configuration: {:?}", e);
        std::process::exit(1);
    });
    validate_settings(&settings)?;

    // Set up metrics
    let _prometheus_handle = metrics::setup_metrics_recorder();
    info!("Prometheus metrics initialized");

    let connection_string = if settings.database.host.starts_with("/cloudsql") {
        format!(
            "postgres://{}:{}@localhost/{}?host={}",
            settings.database.username,
            settings.database.password,
            settings.database.database_name,
            settings.database.host
        )
    } else {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            settings.database.username,
            settings.database.password,
            settings.database.host,
            settings.database.port,
            settings.database.database_name
        )
    };

    info!(
        "Connection string (sanitized): {}",
        connection_string.replace(&settings.database.password, "REDACTED")
    );

    // Initialize database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .connect(&connection_string)
        .await?;

    info!("Successfully connected to database");

    if args.reset {
        info!("Resetting database before sync");
        schema::reset_database(&pool).await?;
    }
    schema::initialize_database(&pool).await?;

    let storage = Arc::new(PgStorage::new(pool));
    let rpc = Arc::new(EthRpcClient::new(
        settings.eth_node.url.clone(),
        Duration::from_secs(settings.eth_node.request_timeout_secs),
    ));

    let indexer = Indexer::new(storage, rpc, settings.indexer.clone(), settings.nft.clone());

    if args.backfill_metadata {
        let updated = indexer.backfill_token_metadata().await?;
        info!("Backfilled metadata for {} tokens", updated);
        return Ok(());
    }

    indexer.start();
    info!("Indexer started");

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping indexer...");
    indexer.stop();
    indexer.wait_until_stopped().await;

    Ok(())
}
