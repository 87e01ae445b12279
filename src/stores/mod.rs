//! Per-entity stores over an injected [`StateBackend`]
//!
//! The stores hold no state of their own. Each call validates and rounds its
//! input, performs one backend operation and reports absence or conflict
//! through the outcome enums. Unexpected failures are logged here, with the
//! operation and key, before they are returned.

pub mod balance;
pub mod index;
pub mod info;
pub mod lock;
pub mod supported;
pub mod tick;
pub mod ticker;

pub use balance::BalanceStore;
pub use index::IndexCompositionStore;
pub use info::IndexInfoStore;
pub use lock::CoinLockRegistry;
pub use supported::SupportedCoinRegistry;
pub use tick::RebalanceTickCounter;
pub use ticker::TickerStore;

use crate::database::{StateBackend, StoreError, StoreResult};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Entry point handing out store views over one shared backend
#[derive(Clone)]
pub struct Stores {
    backend: Arc<dyn StateBackend>,
}

impl Stores {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub(crate) fn backend(&self) -> &dyn StateBackend {
        self.backend.as_ref()
    }

    /// Round trip to storage; `Unavailable` when it cannot be reached.
    pub async fn ping(&self) -> StoreResult<()> {
        logged("ping", "backend", self.backend.ping().await)
    }

    pub fn supported(&self) -> SupportedCoinRegistry<'_> {
        SupportedCoinRegistry::new(self.backend())
    }

    pub fn tickers(&self) -> TickerStore<'_> {
        TickerStore::new(self.backend())
    }

    pub fn balances(&self) -> BalanceStore<'_> {
        BalanceStore::new(self.backend())
    }

    pub fn locks(&self) -> CoinLockRegistry<'_> {
        CoinLockRegistry::new(self.backend())
    }

    pub fn index(&self) -> IndexCompositionStore<'_> {
        IndexCompositionStore::new(self.backend())
    }

    pub fn info(&self) -> IndexInfoStore<'_> {
        IndexInfoStore::new(self.backend())
    }

    pub fn ticks(&self) -> RebalanceTickCounter<'_> {
        RebalanceTickCounter::new(self.backend())
    }
}

pub(crate) fn logged<T>(operation: &str, key: &str, result: StoreResult<T>) -> StoreResult<T> {
    if let Err(e) = &result {
        log::error!("{} failed for {}: {}", operation, key, e);
    }
    result
}

pub(crate) fn non_negative(field: &str, value: Decimal) -> StoreResult<Decimal> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(StoreError::InvalidData(format!("{} must be >= 0, got {}", field, value)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryBackend;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_ping_reports_outage() {
        let backend = Arc::new(MemoryBackend::new());
        let stores = Stores::new(backend.clone());
        stores.ping().await.unwrap();

        backend.set_available(false);
        assert!(stores.ping().await.unwrap_err().is_unavailable());
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(non_negative("x", dec!(0)).unwrap(), dec!(0));
        assert_eq!(non_negative("x", dec!(1.5)).unwrap(), dec!(1.5));
        assert!(matches!(non_negative("x", dec!(-0.1)), Err(StoreError::InvalidData(_))));
    }
}
