use crate::database::*;
use crate::stores::logged;

/// The set of coins allowed to appear in the other stores
pub struct SupportedCoinRegistry<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> SupportedCoinRegistry<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    /// Never overwrites: an existing ticker yields `Duplicate`.
    pub async fn create(&self, ticker: &str) -> StoreResult<CreateOutcome> {
        let inserted = logged(
            "create supported coin",
            ticker,
            self.backend.insert_supported_coin(ticker).await,
        )?;
        if inserted {
            log::info!("Supported coin added: {}", ticker);
        }
        Ok(CreateOutcome::from_inserted(inserted))
    }

    /// Removes the coin along with its ticker, balance and index rows.
    pub async fn remove(&self, ticker: &str) -> StoreResult<DeleteOutcome> {
        let deleted = logged(
            "remove supported coin",
            ticker,
            self.backend.delete_supported_coin(ticker).await,
        )?;
        if deleted {
            log::info!("Supported coin removed: {}", ticker);
        }
        Ok(DeleteOutcome::from_deleted(deleted))
    }

    pub async fn get_all(&self) -> StoreResult<Vec<SupportedCoin>> {
        logged("list supported coins", "*", self.backend.list_supported_coins().await)
    }
}
