//! Database types and data structures

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Decimal places kept for BTC/USD values and coin quantities.
pub const VALUE_DP: u32 = 8;
/// Decimal places kept for percentages.
pub const PERCENT_DP: u32 = 2;

pub fn round_value(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(VALUE_DP, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_DP, RoundingStrategy::MidpointAwayFromZero)
}

// =================================================================
// Rows
// =================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedCoin {
    pub ticker: String,
}

/// Last fetched price of a coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub ticker: String,
    pub btc_val: Decimal,
    pub usd_val: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Balance snapshot carrying one step of BTC history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinBalance {
    pub coin: String,
    pub prior_btc_balance: Decimal,
    pub btc_balance: Decimal,
    pub usd_balance: Decimal,
    pub total_coins: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl CoinBalance {
    /// BTC movement since the previous snapshot.
    pub fn btc_drift(&self) -> Decimal {
        self.btc_balance - self.prior_btc_balance
    }
}

/// "Locked as of the last recomputation", kept for reporting.
///
/// This is not a mutual-exclusion primitive. Only
/// [`CoinLockRegistry`](crate::stores::CoinLockRegistry) serialises actions on a coin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoftLockFlag(bool);

impl SoftLockFlag {
    pub const SET: SoftLockFlag = SoftLockFlag(true);
    pub const CLEAR: SoftLockFlag = SoftLockFlag(false);

    pub fn new(set: bool) -> Self {
        SoftLockFlag(set)
    }

    pub fn is_set(self) -> bool {
        self.0
    }
}

/// One coin of the index with its target weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedCoin {
    pub ticker: String,
    pub desired_percentage: Decimal,
    pub distance_from_target: Decimal,
    pub locked: SoftLockFlag,
}

/// Singleton with the global switch, aggregate valuation and tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub active: bool,
    pub total_btc_val: Decimal,
    pub total_usd_val: Decimal,
    /// Minimum drift, in percent, before a coin is rebalanced.
    pub balance_threshold: Decimal,
    pub order_timeout_secs: u32,
    pub order_retry_amount: u32,
    /// Scheduler ticks per rebalance pass.
    pub rebalance_tick_setting: u32,
}

impl IndexInfo {
    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.order_timeout_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceTick {
    pub tick_count: u64,
}

/// A held coin lock. The row existing is the lock; `locked_at` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinLock {
    pub ticker: String,
    pub locked_at: DateTime<Utc>,
}

// =================================================================
// Outcomes
// =================================================================

/// Result of reading a row that may not exist yet
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A row with the same key exists and was left untouched.
    Duplicate,
}

impl CreateOutcome {
    pub fn from_inserted(inserted: bool) -> Self {
        if inserted { CreateOutcome::Created } else { CreateOutcome::Duplicate }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
}

impl UpdateOutcome {
    pub fn from_updated(updated: bool) -> Self {
        if updated { UpdateOutcome::Updated } else { UpdateOutcome::NotFound }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

impl DeleteOutcome {
    pub fn from_deleted(deleted: bool) -> Self {
        if deleted { DeleteOutcome::Deleted } else { DeleteOutcome::NotFound }
    }
}

/// Balance update result; carries the row as written
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceUpdate {
    Updated(CoinBalance),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickUpdate {
    Updated,
    NotFound,
    /// The new count was lower than the stored one; nothing was written.
    Regressed { current: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// No lock row existed. Unconditional cleanup lands here.
    NotHeld,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_value_eight_places() {
        assert_eq!(round_value(dec!(1.123456789)), dec!(1.12345679));
        assert_eq!(round_value(dec!(2.987654321)), dec!(2.98765432));
        assert_eq!(round_value(round_value(dec!(1.123456789))), dec!(1.12345679));
    }

    #[test]
    fn test_round_percent_midpoint() {
        assert_eq!(round_percent(dec!(3.245)), dec!(3.25));
        assert_eq!(round_percent(dec!(-3.245)), dec!(-3.25));
        assert_eq!(round_percent(dec!(50)), dec!(50));
    }

    #[test]
    fn test_lookup_conversions() {
        let found: Lookup<u8> = Some(3).into();
        assert!(found.is_found());
        assert_eq!(found.map(|v| v * 2).into_option(), Some(6));
        let missing: Lookup<u8> = None.into();
        assert_eq!(missing, Lookup::NotFound);
    }

    #[test]
    fn test_balance_drift() {
        let balance = CoinBalance {
            coin: "ETH".to_string(),
            prior_btc_balance: dec!(10),
            btc_balance: dec!(12),
            usd_balance: dec!(0),
            total_coins: dec!(0),
            last_updated: Utc::now(),
        };
        assert_eq!(balance.btc_drift(), dec!(2));
    }
}
