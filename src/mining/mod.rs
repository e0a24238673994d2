//! Mining module for hashcash stamp creation and pooling

pub mod miner;
pub mod pool;

pub use miner::{MintError, MintStats, Minter, RAND_LEN};
pub use pool::{PoolError, TokenPool, DEFAULT_POOL_SIZE, POOLED_STAMP_TTL_SECS};
