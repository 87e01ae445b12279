//! State-consistency and coordination layer for an index-rebalancing engine
//!
//! Stores for supported coins, tickers, balances, index composition, the
//! index info and rebalance tick singletons, plus the per-coin lock registry
//! that serialises rebalance actions.

pub mod config;
pub mod coordinator;
pub mod database;
pub mod stores;
pub mod utils;

pub use database::{MemoryBackend, PgRepository, StateBackend, StoreError, StoreResult};
pub use stores::Stores;
