pub mod models;
pub mod postgres;
pub mod schema;
pub mod storage;

pub use postgres::PgStorage;
pub use storage::{ChainCounts, DeletedCounts, Storage};
