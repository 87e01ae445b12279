use crate::database::*;
use crate::stores::logged;

/// Durable count of completed scheduler ticks.
///
/// Incrementing and comparing against the tick setting belong to the
/// scheduler; this store keeps the count and refuses to move it backwards.
pub struct RebalanceTickCounter<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> RebalanceTickCounter<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    pub async fn create(&self, tick_count: u64) -> StoreResult<CreateOutcome> {
        let inserted = logged(
            "create rebalance tick",
            "singleton",
            self.backend.insert_rebalance_tick(tick_count).await,
        )?;
        Ok(CreateOutcome::from_inserted(inserted))
    }

    pub async fn get(&self) -> StoreResult<Lookup<RebalanceTick>> {
        logged("get rebalance tick", "singleton", self.backend.fetch_rebalance_tick().await).map(Lookup::from)
    }

    pub async fn update(&self, tick_count: u64) -> StoreResult<TickUpdate> {
        let outcome = logged(
            "update rebalance tick",
            "singleton",
            self.backend.advance_rebalance_tick(tick_count).await,
        )?;
        if let TickUpdate::Regressed { current } = outcome {
            log::warn!("Refused tick count {} below stored {}", tick_count, current);
        }
        Ok(outcome)
    }
}
