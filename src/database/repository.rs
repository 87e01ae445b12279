//! PostgreSQL backend
//! Every operation is a single statement executed on a pooled connection

use crate::config::DatabaseSettings;
use crate::database::backend::{BalanceValues, StateBackend};
use crate::database::error::{StoreError, StoreResult};
use crate::database::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS supported_coins (
        ticker TEXT PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tickers (
        ticker TEXT PRIMARY KEY REFERENCES supported_coins(ticker) ON DELETE CASCADE,
        btc_val NUMERIC(30, 8) NOT NULL CHECK (btc_val >= 0),
        usd_val NUMERIC(30, 8) NOT NULL CHECK (usd_val >= 0),
        last_updated TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coin_balances (
        coin TEXT PRIMARY KEY REFERENCES supported_coins(ticker) ON DELETE CASCADE,
        prior_btc_balance NUMERIC(30, 8) NOT NULL CHECK (prior_btc_balance >= 0),
        btc_balance NUMERIC(30, 8) NOT NULL CHECK (btc_balance >= 0),
        usd_balance NUMERIC(30, 8) NOT NULL CHECK (usd_balance >= 0),
        total_coins NUMERIC(30, 8) NOT NULL CHECK (total_coins >= 0),
        last_updated TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS indexed_coins (
        ticker TEXT PRIMARY KEY REFERENCES supported_coins(ticker) ON DELETE CASCADE,
        desired_percentage NUMERIC(5, 2) NOT NULL CHECK (desired_percentage BETWEEN 0 AND 100),
        distance_from_target NUMERIC(12, 2) NOT NULL,
        locked BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_info (
        id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
        active BOOLEAN NOT NULL,
        total_btc_val NUMERIC(30, 8) NOT NULL,
        total_usd_val NUMERIC(30, 8) NOT NULL,
        balance_threshold NUMERIC NOT NULL,
        order_timeout_secs BIGINT NOT NULL CHECK (order_timeout_secs >= 0),
        order_retry_amount BIGINT NOT NULL CHECK (order_retry_amount >= 0),
        rebalance_tick_setting BIGINT NOT NULL CHECK (rebalance_tick_setting >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rebalance_tick (
        id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
        tick_count BIGINT NOT NULL CHECK (tick_count >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coin_locks (
        ticker TEXT PRIMARY KEY,
        locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

// Intermediate structs for querying results
#[derive(FromRow)]
struct TickerRow {
    ticker: String,
    btc_val: Decimal,
    usd_val: Decimal,
    last_updated: DateTime<Utc>,
}

#[derive(FromRow)]
struct CoinBalanceRow {
    coin: String,
    prior_btc_balance: Decimal,
    btc_balance: Decimal,
    usd_balance: Decimal,
    total_coins: Decimal,
    last_updated: DateTime<Utc>,
}

#[derive(FromRow)]
struct IndexedCoinRow {
    ticker: String,
    desired_percentage: Decimal,
    distance_from_target: Decimal,
    locked: bool,
}

#[derive(FromRow)]
struct IndexInfoRow {
    active: bool,
    total_btc_val: Decimal,
    total_usd_val: Decimal,
    balance_threshold: Decimal,
    order_timeout_secs: i64,
    order_retry_amount: i64,
    rebalance_tick_setting: i64,
}

#[derive(FromRow)]
struct CoinLockRow {
    ticker: String,
    locked_at: DateTime<Utc>,
}

impl From<TickerRow> for Ticker {
    fn from(row: TickerRow) -> Self {
        Ticker {
            ticker: row.ticker,
            btc_val: row.btc_val,
            usd_val: row.usd_val,
            last_updated: row.last_updated,
        }
    }
}

impl From<CoinBalanceRow> for CoinBalance {
    fn from(row: CoinBalanceRow) -> Self {
        CoinBalance {
            coin: row.coin,
            prior_btc_balance: row.prior_btc_balance,
            btc_balance: row.btc_balance,
            usd_balance: row.usd_balance,
            total_coins: row.total_coins,
            last_updated: row.last_updated,
        }
    }
}

impl From<IndexedCoinRow> for IndexedCoin {
    fn from(row: IndexedCoinRow) -> Self {
        IndexedCoin {
            ticker: row.ticker,
            desired_percentage: row.desired_percentage,
            distance_from_target: row.distance_from_target,
            locked: SoftLockFlag::new(row.locked),
        }
    }
}

impl From<CoinLockRow> for CoinLock {
    fn from(row: CoinLockRow) -> Self {
        CoinLock {
            ticker: row.ticker,
            locked_at: row.locked_at,
        }
    }
}

impl TryFrom<IndexInfoRow> for IndexInfo {
    type Error = StoreError;

    fn try_from(row: IndexInfoRow) -> StoreResult<Self> {
        Ok(IndexInfo {
            active: row.active,
            total_btc_val: row.total_btc_val,
            total_usd_val: row.total_usd_val,
            balance_threshold: row.balance_threshold,
            order_timeout_secs: narrow("order_timeout_secs", row.order_timeout_secs)?,
            order_retry_amount: narrow("order_retry_amount", row.order_retry_amount)?,
            rebalance_tick_setting: narrow("rebalance_tick_setting", row.rebalance_tick_setting)?,
        })
    }
}

fn narrow(field: &str, value: i64) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{} out of range: {}", field, value)))
}

fn tick_to_db(tick_count: u64) -> StoreResult<i64> {
    i64::try_from(tick_count)
        .map_err(|_| StoreError::InvalidData(format!("tick count out of range: {}", tick_count)))
}

fn tick_from_db(tick_count: i64) -> StoreResult<u64> {
    u64::try_from(tick_count)
        .map_err(|_| StoreError::InvalidData(format!("negative tick count stored: {}", tick_count)))
}

/// Maps constraint violations on rows keyed by a supported coin.
fn gated(err: sqlx::Error, ticker: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_foreign_key_violation() {
            return StoreError::UnsupportedCoin(ticker.to_string());
        }
        if db.is_check_violation() {
            return StoreError::InvalidData(db.message().to_string());
        }
    }
    StoreError::from(err)
}

/// PostgreSQL implementation of [`StateBackend`]
#[derive(Clone)]
pub struct PgRepository {
    pool: Arc<PgPool>,
}

impl PgRepository {
    /// Create new repository instance
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create database pool from settings
    pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
            .await
            .context("Failed to connect to PostgreSQL database")
    }

    /// Create every table if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool.as_ref())
                .await
                .context("Failed to apply schema")?;
        }
        log::info!("Schema ready ({} tables)", SCHEMA.len());
        Ok(())
    }
}

#[async_trait]
impl StateBackend for PgRepository {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }

    // =================================================================
    // Supported Coins
    // =================================================================

    async fn insert_supported_coin(&self, ticker: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO supported_coins (ticker) VALUES ($1) ON CONFLICT (ticker) DO NOTHING",
        )
        .bind(ticker)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_supported_coin(&self, ticker: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM supported_coins WHERE ticker = $1")
            .bind(ticker)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_supported_coins(&self) -> StoreResult<Vec<SupportedCoin>> {
        let rows = sqlx::query_scalar::<_, String>("SELECT ticker FROM supported_coins ORDER BY ticker")
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.into_iter().map(|ticker| SupportedCoin { ticker }).collect())
    }

    // =================================================================
    // Tickers
    // =================================================================

    async fn insert_ticker(&self, row: &Ticker) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tickers (ticker, btc_val, usd_val, last_updated)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ticker) DO NOTHING
            "#,
        )
        .bind(&row.ticker)
        .bind(row.btc_val)
        .bind(row.usd_val)
        .bind(row.last_updated)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| gated(e, &row.ticker))?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_ticker(&self, row: &Ticker) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE tickers SET btc_val = $2, usd_val = $3, last_updated = $4 WHERE ticker = $1",
        )
        .bind(&row.ticker)
        .bind(row.btc_val)
        .bind(row.usd_val)
        .bind(row.last_updated)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| gated(e, &row.ticker))?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_ticker(&self, ticker: &str) -> StoreResult<Option<Ticker>> {
        let row = sqlx::query_as::<_, TickerRow>(
            "SELECT ticker, btc_val, usd_val, last_updated FROM tickers WHERE ticker = $1",
        )
        .bind(ticker)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(Ticker::from))
    }

    async fn list_tickers(&self) -> StoreResult<Vec<Ticker>> {
        let rows = sqlx::query_as::<_, TickerRow>(
            "SELECT ticker, btc_val, usd_val, last_updated FROM tickers ORDER BY ticker",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.into_iter().map(Ticker::from).collect())
    }

    // =================================================================
    // Balances
    // =================================================================

    async fn insert_balance(&self, row: &CoinBalance) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO coin_balances (coin, prior_btc_balance, btc_balance, usd_balance, total_coins, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (coin) DO NOTHING
            "#,
        )
        .bind(&row.coin)
        .bind(row.prior_btc_balance)
        .bind(row.btc_balance)
        .bind(row.usd_balance)
        .bind(row.total_coins)
        .bind(row.last_updated)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| gated(e, &row.coin))?;
        Ok(result.rows_affected() == 1)
    }

    async fn shift_balance(&self, coin: &str, values: &BalanceValues) -> StoreResult<Option<CoinBalance>> {
        // SET expressions read the pre-update row, so the shift and the write are one step.
        let row = sqlx::query_as::<_, CoinBalanceRow>(
            r#"
            UPDATE coin_balances SET
                prior_btc_balance = btc_balance,
                btc_balance = $2,
                usd_balance = $3,
                total_coins = $4,
                last_updated = $5
            WHERE coin = $1
            RETURNING coin, prior_btc_balance, btc_balance, usd_balance, total_coins, last_updated
            "#,
        )
        .bind(coin)
        .bind(values.btc_balance)
        .bind(values.usd_balance)
        .bind(values.total_coins)
        .bind(values.last_updated)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| gated(e, coin))?;
        Ok(row.map(CoinBalance::from))
    }

    async fn fetch_balance(&self, coin: &str) -> StoreResult<Option<CoinBalance>> {
        let row = sqlx::query_as::<_, CoinBalanceRow>(
            r#"
            SELECT coin, prior_btc_balance, btc_balance, usd_balance, total_coins, last_updated
            FROM coin_balances WHERE coin = $1
            "#,
        )
        .bind(coin)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(CoinBalance::from))
    }

    // =================================================================
    // Index Composition
    // =================================================================

    async fn insert_indexed_coin(&self, row: &IndexedCoin) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO indexed_coins (ticker, desired_percentage, distance_from_target, locked)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ticker) DO NOTHING
            "#,
        )
        .bind(&row.ticker)
        .bind(row.desired_percentage)
        .bind(row.distance_from_target)
        .bind(row.locked.is_set())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| gated(e, &row.ticker))?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_indexed_coin(&self, row: &IndexedCoin) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE indexed_coins
            SET desired_percentage = $2, distance_from_target = $3, locked = $4
            WHERE ticker = $1
            "#,
        )
        .bind(&row.ticker)
        .bind(row.desired_percentage)
        .bind(row.distance_from_target)
        .bind(row.locked.is_set())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| gated(e, &row.ticker))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_indexed_coin(&self, ticker: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM indexed_coins WHERE ticker = $1")
            .bind(ticker)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_indexed_coin(&self, ticker: &str) -> StoreResult<Option<IndexedCoin>> {
        let row = sqlx::query_as::<_, IndexedCoinRow>(
            r#"
            SELECT ticker, desired_percentage, distance_from_target, locked
            FROM indexed_coins WHERE ticker = $1
            "#,
        )
        .bind(ticker)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(IndexedCoin::from))
    }

    async fn list_indexed_coins(&self) -> StoreResult<Vec<IndexedCoin>> {
        let rows = sqlx::query_as::<_, IndexedCoinRow>(
            r#"
            SELECT ticker, desired_percentage, distance_from_target, locked
            FROM indexed_coins ORDER BY ticker
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.into_iter().map(IndexedCoin::from).collect())
    }

    // =================================================================
    // Index Info
    // =================================================================

    async fn insert_index_info(&self, row: &IndexInfo) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO index_info (
                id, active, total_btc_val, total_usd_val, balance_threshold,
                order_timeout_secs, order_retry_amount, rebalance_tick_setting
            )
            VALUES (1, $1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(row.active)
        .bind(row.total_btc_val)
        .bind(row.total_usd_val)
        .bind(row.balance_threshold)
        .bind(i64::from(row.order_timeout_secs))
        .bind(i64::from(row.order_retry_amount))
        .bind(i64::from(row.rebalance_tick_setting))
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_index_info(&self, row: &IndexInfo) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE index_info SET
                active = $1,
                total_btc_val = $2,
                total_usd_val = $3,
                balance_threshold = $4,
                order_timeout_secs = $5,
                order_retry_amount = $6,
                rebalance_tick_setting = $7
            WHERE id = 1
            "#,
        )
        .bind(row.active)
        .bind(row.total_btc_val)
        .bind(row.total_usd_val)
        .bind(row.balance_threshold)
        .bind(i64::from(row.order_timeout_secs))
        .bind(i64::from(row.order_retry_amount))
        .bind(i64::from(row.rebalance_tick_setting))
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_index_info(&self) -> StoreResult<Option<IndexInfo>> {
        let row = sqlx::query_as::<_, IndexInfoRow>(
            r#"
            SELECT active, total_btc_val, total_usd_val, balance_threshold,
                   order_timeout_secs, order_retry_amount, rebalance_tick_setting
            FROM index_info WHERE id = 1
            "#,
        )
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(IndexInfo::try_from).transpose()
    }

    // =================================================================
    // Rebalance Tick
    // =================================================================

    async fn insert_rebalance_tick(&self, tick_count: u64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO rebalance_tick (id, tick_count) VALUES (1, $1) ON CONFLICT (id) DO NOTHING",
        )
        .bind(tick_to_db(tick_count)?)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn advance_rebalance_tick(&self, tick_count: u64) -> StoreResult<TickUpdate> {
        let result = sqlx::query(
            "UPDATE rebalance_tick SET tick_count = $1 WHERE id = 1 AND tick_count <= $1",
        )
        .bind(tick_to_db(tick_count)?)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(TickUpdate::Updated);
        }
        match self.fetch_rebalance_tick().await? {
            Some(current) => Ok(TickUpdate::Regressed { current: current.tick_count }),
            None => Ok(TickUpdate::NotFound),
        }
    }

    async fn fetch_rebalance_tick(&self) -> StoreResult<Option<RebalanceTick>> {
        let count = sqlx::query_scalar::<_, i64>("SELECT tick_count FROM rebalance_tick WHERE id = 1")
            .fetch_optional(self.pool.as_ref())
            .await?;
        count
            .map(|c| tick_from_db(c).map(|tick_count| RebalanceTick { tick_count }))
            .transpose()
    }

    // =================================================================
    // Coin Locks
    // =================================================================

    async fn insert_coin_lock(&self, ticker: &str, locked_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO coin_locks (ticker, locked_at) VALUES ($1, $2) ON CONFLICT (ticker) DO NOTHING",
        )
        .bind(ticker)
        .bind(locked_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_coin_lock(&self, ticker: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM coin_locks WHERE ticker = $1")
            .bind(ticker)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_coin_lock(&self, ticker: &str) -> StoreResult<Option<CoinLock>> {
        let row = sqlx::query_as::<_, CoinLockRow>(
            "SELECT ticker, locked_at FROM coin_locks WHERE ticker = $1",
        )
        .bind(ticker)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(CoinLock::from))
    }

    async fn list_coin_locks(&self) -> StoreResult<Vec<CoinLock>> {
        let rows = sqlx::query_as::<_, CoinLockRow>(
            "SELECT ticker, locked_at FROM coin_locks ORDER BY ticker",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.into_iter().map(CoinLock::from).collect())
    }
}
