use crate::database::*;
use crate::stores::{logged, non_negative};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Balance snapshots with one step of BTC history
pub struct BalanceStore<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> BalanceStore<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    fn values(
        btc_balance: Decimal,
        usd_balance: Decimal,
        total_coins: Decimal,
        last_updated: DateTime<Utc>,
    ) -> StoreResult<BalanceValues> {
        Ok(BalanceValues {
            btc_balance: round_value(non_negative("btc_balance", btc_balance)?),
            usd_balance: round_value(non_negative("usd_balance", usd_balance)?),
            total_coins: round_value(non_negative("total_coins", total_coins)?),
            last_updated,
        })
    }

    /// First observation: the prior balance is seeded with the current one.
    pub async fn create(
        &self,
        coin: &str,
        btc_balance: Decimal,
        usd_balance: Decimal,
        total_coins: Decimal,
        last_updated: DateTime<Utc>,
    ) -> StoreResult<CreateOutcome> {
        let values = logged(
            "create balance",
            coin,
            Self::values(btc_balance, usd_balance, total_coins, last_updated),
        )?;
        let row = CoinBalance {
            coin: coin.to_string(),
            prior_btc_balance: values.btc_balance,
            btc_balance: values.btc_balance,
            usd_balance: values.usd_balance,
            total_coins: values.total_coins,
            last_updated: values.last_updated,
        };
        let inserted = logged("create balance", coin, self.backend.insert_balance(&row).await)?;
        Ok(CreateOutcome::from_inserted(inserted))
    }

    /// Shifts the stored BTC balance into the prior slot and writes the new
    /// values atomically. No reader sees both fields holding the new value.
    pub async fn update(
        &self,
        coin: &str,
        btc_balance: Decimal,
        usd_balance: Decimal,
        total_coins: Decimal,
        last_updated: DateTime<Utc>,
    ) -> StoreResult<BalanceUpdate> {
        let values = logged(
            "update balance",
            coin,
            Self::values(btc_balance, usd_balance, total_coins, last_updated),
        )?;
        let written = logged("update balance", coin, self.backend.shift_balance(coin, &values).await)?;
        Ok(match written {
            Some(row) => {
                log::debug!(
                    "Balance {}: {} -> {} BTC",
                    coin,
                    row.prior_btc_balance,
                    row.btc_balance
                );
                BalanceUpdate::Updated(row)
            }
            None => BalanceUpdate::NotFound,
        })
    }

    pub async fn get(&self, coin: &str) -> StoreResult<Lookup<CoinBalance>> {
        logged("get balance", coin, self.backend.fetch_balance(coin).await).map(Lookup::from)
    }

    /// BTC movement since the previous check.
    pub async fn drift(&self, coin: &str) -> StoreResult<Lookup<Decimal>> {
        Ok(self.get(coin).await?.map(|row| row.btc_drift()))
    }
}
