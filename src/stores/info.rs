use crate::database::*;
use crate::stores::{logged, non_negative};

/// The index info singleton, consulted by the coordinator every cycle
pub struct IndexInfoStore<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> IndexInfoStore<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    fn normalized(info: &IndexInfo) -> StoreResult<IndexInfo> {
        Ok(IndexInfo {
            total_btc_val: round_value(non_negative("total_btc_val", info.total_btc_val)?),
            total_usd_val: round_value(non_negative("total_usd_val", info.total_usd_val)?),
            balance_threshold: non_negative("balance_threshold", info.balance_threshold)?,
            ..info.clone()
        })
    }

    /// Bootstrap only; once the row exists every create returns `Duplicate`.
    pub async fn create(&self, info: &IndexInfo) -> StoreResult<CreateOutcome> {
        let row = logged("create index info", "singleton", Self::normalized(info))?;
        let inserted = logged("create index info", "singleton", self.backend.insert_index_info(&row).await)?;
        if inserted {
            log::info!(
                "Index info created (active={}, threshold={}%, ticks/pass={})",
                row.active,
                row.balance_threshold,
                row.rebalance_tick_setting
            );
        }
        Ok(CreateOutcome::from_inserted(inserted))
    }

    pub async fn get(&self) -> StoreResult<Lookup<IndexInfo>> {
        logged("get index info", "singleton", self.backend.fetch_index_info().await).map(Lookup::from)
    }

    /// Overwrites every field in one write.
    pub async fn update(&self, info: &IndexInfo) -> StoreResult<UpdateOutcome> {
        let row = logged("update index info", "singleton", Self::normalized(info))?;
        let updated = logged("update index info", "singleton", self.backend.update_index_info(&row).await)?;
        Ok(UpdateOutcome::from_updated(updated))
    }
}

#[cfg(test)]
mod tests {
    use crate::database::*;
    use crate::stores::Stores;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn info() -> IndexInfo {
        IndexInfo {
            active: false,
            total_btc_val: dec!(1.123456789),
            total_usd_val: dec!(70000),
            balance_threshold: dec!(5),
            order_timeout_secs: 300,
            order_retry_amount: 3,
            rebalance_tick_setting: 60,
        }
    }

    #[tokio::test]
    async fn test_singleton_enforced() {
        let stores = Stores::new(Arc::new(MemoryBackend::new()));
        let store = stores.info();

        assert_eq!(store.get().await.unwrap(), Lookup::NotFound);
        assert_eq!(store.create(&info()).await.unwrap(), CreateOutcome::Created);

        let mut other = info();
        other.active = true;
        other.order_retry_amount = 9;
        assert_eq!(store.create(&other).await.unwrap(), CreateOutcome::Duplicate);

        let row = store.get().await.unwrap().into_option().unwrap();
        assert!(!row.active);
        assert_eq!(row.order_retry_amount, 3);
        assert_eq!(row.total_btc_val, dec!(1.12345679));
    }

    #[tokio::test]
    async fn test_update_overwrites_all_fields() {
        let stores = Stores::new(Arc::new(MemoryBackend::new()));
        let store = stores.info();

        assert_eq!(store.update(&info()).await.unwrap(), UpdateOutcome::NotFound);
        store.create(&info()).await.unwrap();

        let next = IndexInfo {
            active: true,
            total_btc_val: dec!(2),
            total_usd_val: dec!(140000.000000001),
            balance_threshold: dec!(2.5),
            order_timeout_secs: 120,
            order_retry_amount: 5,
            rebalance_tick_setting: 30,
        };
        assert_eq!(store.update(&next).await.unwrap(), UpdateOutcome::Updated);

        let row = store.get().await.unwrap().into_option().unwrap();
        assert_eq!(row.total_usd_val, dec!(140000));
        assert_eq!(row, IndexInfo { total_usd_val: dec!(140000), ..next });
        assert_eq!(row.order_timeout(), std::time::Duration::from_secs(120));
    }
}
