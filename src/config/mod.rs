mod settings;
mod validation;

pub use settings::{
    DatabaseSettings, EthNodeSettings, IndexerSettings, NftSettings, Settings,
};
pub use validation::validate_settings;
