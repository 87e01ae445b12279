//! Coin lock registry
//!
//! At most one rebalance action per coin at any time, across every process
//! sharing the backend. The lock row's existence is the lock. `acquire` is a
//! single insert that loses on the key's uniqueness; there is no queueing,
//! so a caller that loses decides itself whether to retry, skip or fail.

use crate::database::*;
use crate::stores::logged;
use chrono::Utc;

pub struct CoinLockRegistry<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> CoinLockRegistry<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    /// `AlreadyLocked` is normal contention; storage loss comes back as
    /// [`StoreError::Unavailable`].
    pub async fn acquire(&self, ticker: &str) -> StoreResult<LockOutcome> {
        let inserted = logged(
            "acquire coin lock",
            ticker,
            self.backend.insert_coin_lock(ticker, Utc::now()).await,
        )?;
        if inserted {
            log::debug!("🔒 Lock acquired: {}", ticker);
            Ok(LockOutcome::Acquired)
        } else {
            log::debug!("Lock busy: {}", ticker);
            Ok(LockOutcome::AlreadyLocked)
        }
    }

    /// Safe to call unconditionally during cleanup.
    pub async fn release(&self, ticker: &str) -> StoreResult<ReleaseOutcome> {
        let deleted = logged("release coin lock", ticker, self.backend.delete_coin_lock(ticker).await)?;
        if deleted {
            log::debug!("🔓 Lock released: {}", ticker);
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::NotHeld)
        }
    }

    /// Advisory read for status reporting. Acting on it races with `acquire`.
    pub async fn is_locked(&self, ticker: &str) -> StoreResult<bool> {
        let row = logged("check coin lock", ticker, self.backend.fetch_coin_lock(ticker).await)?;
        Ok(row.is_some())
    }

    pub async fn held(&self) -> StoreResult<Vec<CoinLock>> {
        logged("list coin locks", "*", self.backend.list_coin_locks().await)
    }
}
