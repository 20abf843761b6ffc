use anyhow::{anyhow, Result};

use crate::config::Settings;

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.database.max_connections < settings.database.min_connections {
        return Err(anyhow!(
            "max_connections ({}) must be greater than min_connections ({})",
            settings.database.max_connections,
            settings.database.min_connections
        ));
    }

    if settings.eth_node.url.is_empty() {
        return Err(anyhow!("eth_node.url must be set"));
    }

    let idx = &settings.indexer;
    if idx.min_batch_size == 0 {
        return Err(anyhow!("indexer.min_batch_size must be at least 1"));
    }
    if idx.min_batch_size > idx.max_batch_size {
        return Err(anyhow!(
            "indexer.min_batch_size ({}) must not exceed indexer.max_batch_size ({})",
            idx.min_batch_size,
            idx.max_batch_size
        ));
    }
    if idx.batch_size < idx.min_batch_size || idx.batch_size > idx.max_batch_size {
        return Err(anyhow!(
            "indexer.batch_size ({}) must lie within [{}, {}]",
            idx.batch_size,
            idx.min_batch_size,
            idx.max_batch_size
        ));
    }
    if idx.parallel_blocks == 0 {
        return Err(anyhow!("indexer.parallel_blocks must be at least 1"));
    }
    if idx.reorg_depth < 1 {
        return Err(anyhow!("indexer.reorg_depth must be at least 1"));
    }

    Ok(())
}
