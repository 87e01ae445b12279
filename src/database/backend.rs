//! Storage seam between the stores and a concrete engine
//!
//! Every method is one atomic unit of work. Inserts report `false` when the
//! key already exists, updates and deletes report `false` when no row matched.
//! Values arrive already validated and rounded by the stores.

use crate::database::error::StoreResult;
use crate::database::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Values written by a balance shift
#[derive(Debug, Clone)]
pub struct BalanceValues {
    pub btc_balance: Decimal,
    pub usd_balance: Decimal,
    pub total_coins: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Cheap round trip used for health checks.
    async fn ping(&self) -> StoreResult<()>;

    // Supported coins
    async fn insert_supported_coin(&self, ticker: &str) -> StoreResult<bool>;
    /// Removes the coin together with its ticker, balance and index rows.
    async fn delete_supported_coin(&self, ticker: &str) -> StoreResult<bool>;
    async fn list_supported_coins(&self) -> StoreResult<Vec<SupportedCoin>>;

    // Tickers
    async fn insert_ticker(&self, row: &Ticker) -> StoreResult<bool>;
    async fn update_ticker(&self, row: &Ticker) -> StoreResult<bool>;
    async fn fetch_ticker(&self, ticker: &str) -> StoreResult<Option<Ticker>>;
    async fn list_tickers(&self) -> StoreResult<Vec<Ticker>>;

    // Balances
    async fn insert_balance(&self, row: &CoinBalance) -> StoreResult<bool>;
    /// Moves the stored BTC balance into the prior slot and writes `values`,
    /// as one atomic step. Returns the row as written.
    async fn shift_balance(&self, coin: &str, values: &BalanceValues) -> StoreResult<Option<CoinBalance>>;
    async fn fetch_balance(&self, coin: &str) -> StoreResult<Option<CoinBalance>>;

    // Index composition
    async fn insert_indexed_coin(&self, row: &IndexedCoin) -> StoreResult<bool>;
    async fn update_indexed_coin(&self, row: &IndexedCoin) -> StoreResult<bool>;
    async fn delete_indexed_coin(&self, ticker: &str) -> StoreResult<bool>;
    async fn fetch_indexed_coin(&self, ticker: &str) -> StoreResult<Option<IndexedCoin>>;
    async fn list_indexed_coins(&self) -> StoreResult<Vec<IndexedCoin>>;

    // Index info singleton
    async fn insert_index_info(&self, row: &IndexInfo) -> StoreResult<bool>;
    async fn update_index_info(&self, row: &IndexInfo) -> StoreResult<bool>;
    async fn fetch_index_info(&self) -> StoreResult<Option<IndexInfo>>;

    // Rebalance tick singleton
    async fn insert_rebalance_tick(&self, tick_count: u64) -> StoreResult<bool>;
    /// Writes `tick_count` only if it is not below the stored count.
    async fn advance_rebalance_tick(&self, tick_count: u64) -> StoreResult<TickUpdate>;
    async fn fetch_rebalance_tick(&self) -> StoreResult<Option<RebalanceTick>>;

    // Coin locks
    /// Test-and-set: a single insert guarded by the key's uniqueness.
    async fn insert_coin_lock(&self, ticker: &str, locked_at: DateTime<Utc>) -> StoreResult<bool>;
    async fn delete_coin_lock(&self, ticker: &str) -> StoreResult<bool>;
    async fn fetch_coin_lock(&self, ticker: &str) -> StoreResult<Option<CoinLock>>;
    async fn list_coin_locks(&self) -> StoreResult<Vec<CoinLock>>;
}
