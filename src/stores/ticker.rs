use crate::database::*;
use crate::stores::{logged, non_negative};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Last known BTC/USD price per coin
pub struct TickerStore<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> TickerStore<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    fn row(ticker: &str, btc_val: Decimal, usd_val: Decimal, last_updated: DateTime<Utc>) -> StoreResult<Ticker> {
        Ok(Ticker {
            ticker: ticker.to_string(),
            btc_val: round_value(non_negative("btc_val", btc_val)?),
            usd_val: round_value(non_negative("usd_val", usd_val)?),
            last_updated,
        })
    }

    /// First price for a coin. An existing row is left alone and `Duplicate` returned.
    pub async fn create(
        &self,
        ticker: &str,
        btc_val: Decimal,
        usd_val: Decimal,
        last_updated: DateTime<Utc>,
    ) -> StoreResult<CreateOutcome> {
        let row = logged("create ticker", ticker, Self::row(ticker, btc_val, usd_val, last_updated))?;
        let inserted = logged("create ticker", ticker, self.backend.insert_ticker(&row).await)?;
        Ok(CreateOutcome::from_inserted(inserted))
    }

    /// On failure the previous row stays intact for the next poll.
    pub async fn update(
        &self,
        ticker: &str,
        btc_val: Decimal,
        usd_val: Decimal,
        last_updated: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let row = logged("update ticker", ticker, Self::row(ticker, btc_val, usd_val, last_updated))?;
        let updated = logged("update ticker", ticker, self.backend.update_ticker(&row).await)?;
        if !updated {
            log::debug!("Ticker {} has no row to update", ticker);
        }
        Ok(UpdateOutcome::from_updated(updated))
    }

    pub async fn get(&self, ticker: &str) -> StoreResult<Lookup<Ticker>> {
        logged("get ticker", ticker, self.backend.fetch_ticker(ticker).await).map(Lookup::from)
    }

    pub async fn get_all(&self) -> StoreResult<Vec<Ticker>> {
        logged("list tickers", "*", self.backend.list_tickers().await)
    }
}
