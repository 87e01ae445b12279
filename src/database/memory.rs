//! In-process backend for tests and dry runs
//!
//! One async mutex guards every table, so each call is atomic with respect to
//! every other call. State does not cross process boundaries; production
//! coordination goes through [`PgRepository`](crate::database::PgRepository).

use crate::database::backend::{BalanceValues, StateBackend};
use crate::database::error::{StoreError, StoreResult};
use crate::database::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    supported: BTreeMap<String, SupportedCoin>,
    tickers: BTreeMap<String, Ticker>,
    balances: BTreeMap<String, CoinBalance>,
    indexed: BTreeMap<String, IndexedCoin>,
    index_info: Option<IndexInfo>,
    rebalance_tick: Option<RebalanceTick>,
    locks: BTreeMap<String, CoinLock>,
}

impl Tables {
    fn require_supported(&self, ticker: &str) -> StoreResult<()> {
        if self.supported.contains_key(ticker) {
            Ok(())
        } else {
            Err(StoreError::UnsupportedCoin(ticker.to_string()))
        }
    }
}

#[derive(Debug)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates losing (or regaining) the storage engine.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    async fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend offline".to_string()));
        }
        Ok(self.tables.lock().await)
    }
}

fn insert_new<T>(map: &mut BTreeMap<String, T>, key: &str, value: T) -> bool {
    if map.contains_key(key) {
        return false;
    }
    map.insert(key.to_string(), value);
    true
}

fn replace_existing<T>(map: &mut BTreeMap<String, T>, key: &str, value: T) -> bool {
    match map.get_mut(key) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn ping(&self) -> StoreResult<()> {
        self.tables().await.map(|_| ())
    }

    async fn insert_supported_coin(&self, ticker: &str) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        let row = SupportedCoin { ticker: ticker.to_string() };
        Ok(insert_new(&mut t.supported, ticker, row))
    }

    async fn delete_supported_coin(&self, ticker: &str) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        if t.supported.remove(ticker).is_none() {
            return Ok(false);
        }
        t.tickers.remove(ticker);
        t.balances.remove(ticker);
        t.indexed.remove(ticker);
        Ok(true)
    }

    async fn list_supported_coins(&self) -> StoreResult<Vec<SupportedCoin>> {
        Ok(self.tables().await?.supported.values().cloned().collect())
    }

    async fn insert_ticker(&self, row: &Ticker) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        t.require_supported(&row.ticker)?;
        Ok(insert_new(&mut t.tickers, &row.ticker, row.clone()))
    }

    async fn update_ticker(&self, row: &Ticker) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        Ok(replace_existing(&mut t.tickers, &row.ticker, row.clone()))
    }

    async fn fetch_ticker(&self, ticker: &str) -> StoreResult<Option<Ticker>> {
        Ok(self.tables().await?.tickers.get(ticker).cloned())
    }

    async fn list_tickers(&self) -> StoreResult<Vec<Ticker>> {
        Ok(self.tables().await?.tickers.values().cloned().collect())
    }

    async fn insert_balance(&self, row: &CoinBalance) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        t.require_supported(&row.coin)?;
        Ok(insert_new(&mut t.balances, &row.coin, row.clone()))
    }

    async fn shift_balance(&self, coin: &str, values: &BalanceValues) -> StoreResult<Option<CoinBalance>> {
        let mut t = self.tables().await?;
        let Some(row) = t.balances.get_mut(coin) else {
            return Ok(None);
        };
        row.prior_btc_balance = row.btc_balance;
        row.btc_balance = values.btc_balance;
        row.usd_balance = values.usd_balance;
        row.total_coins = values.total_coins;
        row.last_updated = values.last_updated;
        Ok(Some(row.clone()))
    }

    async fn fetch_balance(&self, coin: &str) -> StoreResult<Option<CoinBalance>> {
        Ok(self.tables().await?.balances.get(coin).cloned())
    }

    async fn insert_indexed_coin(&self, row: &IndexedCoin) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        t.require_supported(&row.ticker)?;
        Ok(insert_new(&mut t.indexed, &row.ticker, row.clone()))
    }

    async fn update_indexed_coin(&self, row: &IndexedCoin) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        Ok(replace_existing(&mut t.indexed, &row.ticker, row.clone()))
    }

    async fn delete_indexed_coin(&self, ticker: &str) -> StoreResult<bool> {
        Ok(self.tables().await?.indexed.remove(ticker).is_some())
    }

    async fn fetch_indexed_coin(&self, ticker: &str) -> StoreResult<Option<IndexedCoin>> {
        Ok(self.tables().await?.indexed.get(ticker).cloned())
    }

    async fn list_indexed_coins(&self) -> StoreResult<Vec<IndexedCoin>> {
        Ok(self.tables().await?.indexed.values().cloned().collect())
    }

    async fn insert_index_info(&self, row: &IndexInfo) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        if t.index_info.is_some() {
            return Ok(false);
        }
        t.index_info = Some(row.clone());
        Ok(true)
    }

    async fn update_index_info(&self, row: &IndexInfo) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        match t.index_info.as_mut() {
            Some(slot) => {
                *slot = row.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fetch_index_info(&self) -> StoreResult<Option<IndexInfo>> {
        Ok(self.tables().await?.index_info.clone())
    }

    async fn insert_rebalance_tick(&self, tick_count: u64) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        if t.rebalance_tick.is_some() {
            return Ok(false);
        }
        t.rebalance_tick = Some(RebalanceTick { tick_count });
        Ok(true)
    }

    async fn advance_rebalance_tick(&self, tick_count: u64) -> StoreResult<TickUpdate> {
        let mut t = self.tables().await?;
        match t.rebalance_tick.as_mut() {
            None => Ok(TickUpdate::NotFound),
            Some(tick) if tick.tick_count > tick_count => {
                Ok(TickUpdate::Regressed { current: tick.tick_count })
            }
            Some(tick) => {
                tick.tick_count = tick_count;
                Ok(TickUpdate::Updated)
            }
        }
    }

    async fn fetch_rebalance_tick(&self) -> StoreResult<Option<RebalanceTick>> {
        Ok(self.tables().await?.rebalance_tick)
    }

    async fn insert_coin_lock(&self, ticker: &str, locked_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.tables().await?;
        let row = CoinLock { ticker: ticker.to_string(), locked_at };
        Ok(insert_new(&mut t.locks, ticker, row))
    }

    async fn delete_coin_lock(&self, ticker: &str) -> StoreResult<bool> {
        Ok(self.tables().await?.locks.remove(ticker).is_some())
    }

    async fn fetch_coin_lock(&self, ticker: &str) -> StoreResult<Option<CoinLock>> {
        Ok(self.tables().await?.locks.get(ticker).cloned())
    }

    async fn list_coin_locks(&self) -> StoreResult<Vec<CoinLock>> {
        Ok(self.tables().await?.locks.values().cloned().collect())
    }
}
