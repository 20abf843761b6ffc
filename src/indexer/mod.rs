pub mod block_processor;
pub mod nft;
pub mod sync;
pub mod tokens;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_support;

pub use block_processor::BlockProcessor;
pub use nft::{NftPipeline, NftQueue, NftWorkItem};
pub use sync::Indexer;
pub use tokens::TokenProcessor;
pub use trace::Tracer;
