//! Contract the rebalance coordinator honours around the stores
//!
//! Every action on a coin runs between a successful `acquire` and a `release`
//! that is reached on every exit path: completion, timeout, panic, and the
//! surrounding future being dropped.

use crate::database::*;
use crate::stores::{CoinLockRegistry, Stores};
use futures_util::FutureExt;
use rust_decimal::Decimal;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
const RELEASE_ATTEMPTS: u32 = 30;
const RELEASE_BACKOFF: Duration = Duration::from_millis(50);
const RELEASE_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// A held coin lock. Dropping it without a successful [`CoinLockGuard::release`]
/// schedules the release on the current runtime, retried while storage is down.
pub struct CoinLockGuard {
    stores: Stores,
    ticker: String,
    armed: bool,
}

impl CoinLockGuard {
    /// `None` when another actor holds the coin.
    pub async fn acquire(stores: &Stores, ticker: &str) -> StoreResult<Option<Self>> {
        match stores.locks().acquire(ticker).await? {
            LockOutcome::Acquired => Ok(Some(Self {
                stores: stores.clone(),
                ticker: ticker.to_string(),
                armed: true,
            })),
            LockOutcome::AlreadyLocked => Ok(None),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// On error the guard stays armed, so dropping it hands the release to the
    /// background retry.
    pub async fn release(mut self) -> StoreResult<ReleaseOutcome> {
        let outcome = self.stores.locks().release(&self.ticker).await?;
        self.armed = false;
        if outcome == ReleaseOutcome::NotHeld {
            log::warn!("Lock for {} was already gone at release", self.ticker);
        }
        Ok(outcome)
    }
}

async fn release_with_retry(stores: Stores, ticker: String) {
    let mut backoff = RELEASE_BACKOFF;
    for attempt in 1..=RELEASE_ATTEMPTS {
        match stores.locks().release(&ticker).await {
            Ok(_) => {
                log::info!("🔓 Background release of {} succeeded (attempt {})", ticker, attempt);
                return;
            }
            Err(e) if e.is_unavailable() && attempt < RELEASE_ATTEMPTS => {
                log::warn!("Background release of {} failed (attempt {}/{}): {}", ticker, attempt, RELEASE_ATTEMPTS, e);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RELEASE_BACKOFF_CAP);
            }
            Err(e) => {
                log::error!("Background release of {} abandoned, lock left held: {}", ticker, e);
                return;
            }
        }
    }
}

impl Drop for CoinLockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let ticker = std::mem::take(&mut self.ticker);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::warn!("Lock guard for {} dropped unreleased, releasing in background", ticker);
                handle.spawn(release_with_retry(self.stores.clone(), ticker));
            }
            Err(_) => log::error!("Lock guard for {} dropped outside a runtime; lock left held", ticker),
        }
    }
}

#[derive(Debug)]
pub enum ActionOutcome<T> {
    Completed(T),
    /// The action finished but its lock could not be released. The release
    /// keeps retrying in the background.
    CompletedReleaseFailed(T, StoreError),
    /// Another actor holds the coin; nothing ran.
    Busy,
    /// The action exceeded its deadline and was dropped.
    TimedOut,
}

/// Runs `action` while holding the coin lock for `ticker`.
///
/// The lock is released before returning on completion and timeout, and
/// before the panic is resumed if the action panics. A failed release never
/// discards the action's result and is retried in the background.
pub async fn run_locked<T, Fut>(
    stores: &Stores,
    ticker: &str,
    timeout: Option<Duration>,
    action: Fut,
) -> StoreResult<ActionOutcome<T>>
where
    Fut: Future<Output = T>,
{
    let Some(guard) = CoinLockGuard::acquire(stores, ticker).await? else {
        return Ok(ActionOutcome::Busy);
    };

    let guarded = AssertUnwindSafe(action).catch_unwind();
    let finished = match timeout {
        Some(limit) => tokio::time::timeout(limit, guarded).await.ok(),
        None => Some(guarded.await),
    };

    match finished {
        Some(Ok(value)) => match guard.release().await {
            Ok(_) => Ok(ActionOutcome::Completed(value)),
            Err(e) => {
                log::error!("Release of {} after completion failed: {}", ticker, e);
                Ok(ActionOutcome::CompletedReleaseFailed(value, e))
            }
        },
        Some(Err(panic)) => {
            if let Err(e) = guard.release().await {
                log::error!("Release of {} after panic failed: {}", ticker, e);
            }
            std::panic::resume_unwind(panic)
        }
        None => {
            log::warn!("⏱ Action on {} timed out", ticker);
            guard.release().await?;
            Ok(ActionOutcome::TimedOut)
        }
    }
}

/// How hard to try for a busy coin lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_index_info(info: &IndexInfo) -> Self {
        Self {
            attempts: info.order_retry_amount.saturating_add(1),
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(self, backoff: Duration) -> Self {
        Self { backoff, ..self }
    }
}

/// Retries contention only. A storage error ends the attempt immediately.
pub async fn acquire_with_retry(
    locks: &CoinLockRegistry<'_>,
    ticker: &str,
    policy: &RetryPolicy,
) -> StoreResult<LockOutcome> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if locks.acquire(ticker).await? == LockOutcome::Acquired {
            return Ok(LockOutcome::Acquired);
        }
        if attempt < attempts {
            log::debug!("Lock {} busy (attempt {}/{}), retrying", ticker, attempt, attempts);
            tokio::time::sleep(policy.backoff).await;
        }
    }
    Ok(LockOutcome::AlreadyLocked)
}

/// A full pass is due each time the count reaches a multiple of the setting.
pub fn rebalance_due(tick_count: u64, rebalance_tick_setting: u32) -> bool {
    rebalance_tick_setting > 0 && tick_count > 0 && tick_count % u64::from(rebalance_tick_setting) == 0
}

/// Rebalancing runs only once the index info exists and is active.
pub async fn rebalancing_active(stores: &Stores) -> StoreResult<bool> {
    Ok(match stores.info().get().await? {
        Lookup::Found(info) => info.active,
        Lookup::NotFound => false,
    })
}

/// Coins whose distance from target reaches the threshold, in either direction.
pub fn drifted_coins(snapshot: &[IndexedCoin], balance_threshold: Decimal) -> Vec<&IndexedCoin> {
    snapshot
        .iter()
        .filter(|coin| coin.distance_from_target.abs() >= balance_threshold)
        .collect()
}
