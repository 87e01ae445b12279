//! Index composition: target weight, drift and soft lock flag per coin
//!
//! Updates always carry the complete triple so that no field can reflect a
//! stale computation while another reflects a fresh one. The `locked` flag is
//! a [`SoftLockFlag`] for reporting and never gates an action.

use crate::database::*;
use crate::stores::logged;
use rust_decimal::Decimal;

pub struct IndexCompositionStore<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> IndexCompositionStore<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    fn row(
        ticker: &str,
        desired_percentage: Decimal,
        distance_from_target: Decimal,
        locked: SoftLockFlag,
    ) -> StoreResult<IndexedCoin> {
        let desired = round_percent(desired_percentage);
        if desired < Decimal::ZERO || desired > Decimal::ONE_HUNDRED {
            return Err(StoreError::InvalidData(format!(
                "desired percentage must be within 0..=100, got {}",
                desired_percentage
            )));
        }
        Ok(IndexedCoin {
            ticker: ticker.to_string(),
            desired_percentage: desired,
            distance_from_target: round_percent(distance_from_target),
            locked,
        })
    }

    pub async fn create(
        &self,
        ticker: &str,
        desired_percentage: Decimal,
        distance_from_target: Decimal,
        locked: SoftLockFlag,
    ) -> StoreResult<CreateOutcome> {
        let row = logged(
            "create indexed coin",
            ticker,
            Self::row(ticker, desired_percentage, distance_from_target, locked),
        )?;
        let inserted = logged("create indexed coin", ticker, self.backend.insert_indexed_coin(&row).await)?;
        if inserted {
            log::info!("Coin {} added to index at {}%", ticker, row.desired_percentage);
        }
        Ok(CreateOutcome::from_inserted(inserted))
    }

    pub async fn update(
        &self,
        ticker: &str,
        desired_percentage: Decimal,
        distance_from_target: Decimal,
        locked: SoftLockFlag,
    ) -> StoreResult<UpdateOutcome> {
        let row = logged(
            "update indexed coin",
            ticker,
            Self::row(ticker, desired_percentage, distance_from_target, locked),
        )?;
        let updated = logged("update indexed coin", ticker, self.backend.update_indexed_coin(&row).await)?;
        Ok(UpdateOutcome::from_updated(updated))
    }

    /// Writes back a row previously read and recomputed by the caller.
    pub async fn update_coin(&self, coin: &IndexedCoin) -> StoreResult<UpdateOutcome> {
        self.update(
            &coin.ticker,
            coin.desired_percentage,
            coin.distance_from_target,
            coin.locked,
        )
        .await
    }

    pub async fn delete(&self, ticker: &str) -> StoreResult<DeleteOutcome> {
        let deleted = logged("delete indexed coin", ticker, self.backend.delete_indexed_coin(ticker).await)?;
        if deleted {
            log::info!("Coin {} removed from index", ticker);
        }
        Ok(DeleteOutcome::from_deleted(deleted))
    }

    pub async fn get(&self, ticker: &str) -> StoreResult<Lookup<IndexedCoin>> {
        logged("get indexed coin", ticker, self.backend.fetch_indexed_coin(ticker).await).map(Lookup::from)
    }

    /// Full index snapshot, ordered by ticker.
    pub async fn get_all(&self) -> StoreResult<Vec<IndexedCoin>> {
        logged("list indexed coins", "*", self.backend.list_indexed_coins().await)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::*;
    use crate::stores::Stores;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn stores_with(coins: &[&str]) -> Stores {
        let stores = Stores::new(Arc::new(MemoryBackend::new()));
        for coin in coins {
            stores.supported().create(coin).await.unwrap();
        }
        stores
    }

    #[tokio::test]
    async fn test_update_rounds_full_triple() {
        let stores = stores_with(&["BTC"]).await;
        let index = stores.index();

        index.create("BTC", dec!(50), dec!(0), SoftLockFlag::CLEAR).await.unwrap();
        let outcome = index.update("BTC", dec!(49.996), dec!(3.254), SoftLockFlag::SET).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);

        let row = index.get("BTC").await.unwrap().into_option().unwrap();
        assert_eq!(row.desired_percentage, dec!(50.00));
        assert_eq!(row.distance_from_target, dec!(3.25));
        assert!(row.locked.is_set());
    }

    #[tokio::test]
    async fn test_update_coin_writes_back_row() {
        let stores = stores_with(&["BTC"]).await;
        let index = stores.index();
        index.create("BTC", dec!(50), dec!(0), SoftLockFlag::CLEAR).await.unwrap();

        let mut row = index.get("BTC").await.unwrap().into_option().unwrap();
        row.distance_from_target = dec!(-1.5);
        assert_eq!(index.update_coin(&row).await.unwrap(), UpdateOutcome::Updated);
        assert_eq!(index.get("BTC").await.unwrap(), Lookup::Found(row));
    }

    #[tokio::test]
    async fn test_delete_and_snapshot() {
        let stores = stores_with(&["BTC", "ETH"]).await;
        let index = stores.index();
        index.create("ETH", dec!(40), dec!(0), SoftLockFlag::CLEAR).await.unwrap();
        index.create("BTC", dec!(60), dec!(0), SoftLockFlag::CLEAR).await.unwrap();

        let snapshot = index.get_all().await.unwrap();
        let tickers: Vec<&str> = snapshot.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["BTC", "ETH"]);
        let total: rust_decimal::Decimal = snapshot.iter().map(|c| c.desired_percentage).sum();
        assert_eq!(total, dec!(100));

        assert_eq!(index.delete("ETH").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(index.delete("ETH").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(index.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_percentage_rejected() {
        let stores = stores_with(&["BTC"]).await;
        let err = stores
            .index()
            .create("BTC", dec!(100.01), dec!(0), SoftLockFlag::CLEAR)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_soft_flag_does_not_lock() {
        let stores = stores_with(&["BTC"]).await;
        stores.index().create("BTC", dec!(50), dec!(0), SoftLockFlag::SET).await.unwrap();

        assert!(!stores.locks().is_locked("BTC").await.unwrap());
        assert_eq!(stores.locks().acquire("BTC").await.unwrap(), LockOutcome::Acquired);
    }
}
