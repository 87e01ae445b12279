//! End-to-end coordination scenarios against the in-memory backend

use chrono::Utc;
use condex_state::coordinator::{self, ActionOutcome, RetryPolicy};
use condex_state::database::*;
use condex_state::{MemoryBackend, Stores};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn memory_stores() -> (Arc<MemoryBackend>, Stores) {
    let backend = Arc::new(MemoryBackend::new());
    let stores = Stores::new(backend.clone());
    (backend, stores)
}

async fn bootstrap(stores: &Stores) {
    let info = IndexInfo {
        active: true,
        total_btc_val: dec!(0),
        total_usd_val: dec!(0),
        balance_threshold: dec!(3),
        order_timeout_secs: 1,
        order_retry_amount: 2,
        rebalance_tick_setting: 3,
    };
    assert_eq!(stores.info().create(&info).await.unwrap(), CreateOutcome::Created);
    assert_eq!(stores.ticks().create(0).await.unwrap(), CreateOutcome::Created);
}

#[tokio::test]
async fn test_single_coin_rebalance_scenario() {
    let (_, stores) = memory_stores();
    let now = Utc::now();

    assert_eq!(stores.supported().create("BTC").await.unwrap(), CreateOutcome::Created);
    assert_eq!(
        stores.index().create("BTC", dec!(50.00), dec!(0), SoftLockFlag::CLEAR).await.unwrap(),
        CreateOutcome::Created
    );
    assert_eq!(
        stores.balances().create("BTC", dec!(1.0), dec!(65000), dec!(1.0), now).await.unwrap(),
        CreateOutcome::Created
    );

    assert_eq!(stores.locks().acquire("BTC").await.unwrap(), LockOutcome::Acquired);
    stores.balances().update("BTC", dec!(1.5), dec!(97500), dec!(1.5), now).await.unwrap();
    assert_eq!(
        stores.index().update("BTC", dec!(50.00), dec!(3.25), SoftLockFlag::CLEAR).await.unwrap(),
        UpdateOutcome::Updated
    );
    assert_eq!(stores.locks().release("BTC").await.unwrap(), ReleaseOutcome::Released);

    let balance = stores.balances().get("BTC").await.unwrap().into_option().unwrap();
    assert_eq!(balance.prior_btc_balance, dec!(1.0));
    assert_eq!(balance.btc_balance, dec!(1.5));

    let coin = stores.index().get("BTC").await.unwrap().into_option().unwrap();
    assert_eq!(coin.distance_from_target, dec!(3.25));

    assert!(!stores.locks().is_locked("BTC").await.unwrap());
    assert!(stores.locks().held().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_singletons_refuse_second_create() {
    let (_, stores) = memory_stores();
    bootstrap(&stores).await;

    let before = stores.info().get().await.unwrap();
    let replacement = IndexInfo {
        active: false,
        total_btc_val: dec!(9),
        total_usd_val: dec!(9),
        balance_threshold: dec!(9),
        order_timeout_secs: 9,
        order_retry_amount: 9,
        rebalance_tick_setting: 9,
    };
    assert_eq!(stores.info().create(&replacement).await.unwrap(), CreateOutcome::Duplicate);
    assert_eq!(stores.info().get().await.unwrap(), before);

    assert_eq!(stores.ticks().create(42).await.unwrap(), CreateOutcome::Duplicate);
    assert_eq!(
        stores.ticks().get().await.unwrap(),
        Lookup::Found(RebalanceTick { tick_count: 0 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_never_overlap_on_a_coin() {
    let (_, stores) = memory_stores();
    stores.supported().create("ETH").await.unwrap();
    stores.balances().create("ETH", dec!(10), dec!(30000), dec!(300), Utc::now()).await.unwrap();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for worker in 0..8u32 {
        let stores = stores.clone();
        let in_flight = in_flight.clone();
        let overlaps = overlaps.clone();
        let completed = completed.clone();
        workers.push(tokio::spawn(async move {
            let policy = RetryPolicy { attempts: 200, backoff: Duration::from_millis(2) };
            let locks = stores.locks();
            if coordinator::acquire_with_retry(&locks, "ETH", &policy).await.unwrap() != LockOutcome::Acquired {
                return;
            }
            if in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            let btc = dec!(10) + rust_decimal::Decimal::from(worker);
            stores.balances().update("ETH", btc, dec!(30000), dec!(300), Utc::now()).await.unwrap();
            in_flight.fetch_sub(1, Ordering::SeqCst);
            completed.fetch_add(1, Ordering::SeqCst);
            locks.release("ETH").await.unwrap();
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert!(!stores.locks().is_locked("ETH").await.unwrap());
}

#[tokio::test]
async fn test_cycle_skips_busy_coin_and_continues() {
    let (_, stores) = memory_stores();
    bootstrap(&stores).await;
    for coin in ["BTC", "ETH", "LTC"] {
        stores.supported().create(coin).await.unwrap();
        stores.index().create(coin, dec!(33.33), dec!(5), SoftLockFlag::CLEAR).await.unwrap();
    }
    // Another coordinator is mid-order on ETH.
    stores.locks().acquire("ETH").await.unwrap();

    assert!(coordinator::rebalancing_active(&stores).await.unwrap());
    let info = stores.info().get().await.unwrap().into_option().unwrap();
    let snapshot = stores.index().get_all().await.unwrap();

    let mut outcomes = Vec::new();
    for coin in coordinator::drifted_coins(&snapshot, info.balance_threshold) {
        let ticker = coin.ticker.clone();
        let index_stores = stores.clone();
        let outcome = coordinator::run_locked(&stores, &coin.ticker, Some(info.order_timeout()), async move {
            index_stores
                .index()
                .update(&ticker, dec!(33.33), dec!(0), SoftLockFlag::CLEAR)
                .await
        })
        .await
        .unwrap();
        outcomes.push((coin.ticker.clone(), outcome));
    }

    assert_eq!(outcomes.len(), 3);
    for (ticker, outcome) in &outcomes {
        match ticker.as_str() {
            "ETH" => assert!(matches!(outcome, ActionOutcome::Busy)),
            _ => assert!(matches!(outcome, ActionOutcome::Completed(Ok(UpdateOutcome::Updated)))),
        }
    }

    let eth = stores.index().get("ETH").await.unwrap().into_option().unwrap();
    assert_eq!(eth.distance_from_target, dec!(5));
    let locks: Vec<String> = stores.locks().held().await.unwrap().into_iter().map(|l| l.ticker).collect();
    assert_eq!(locks, vec!["ETH".to_string()]);
}

#[tokio::test]
async fn test_outage_halts_instead_of_skipping() {
    let (backend, stores) = memory_stores();
    bootstrap(&stores).await;

    backend.set_available(false);
    let err = coordinator::run_locked(&stores, "BTC", None, async {}).await.unwrap_err();
    assert!(err.is_unavailable());

    let err = stores.tickers().get("BTC").await.unwrap_err();
    assert!(err.is_unavailable(), "outage must not read as not-found");

    backend.set_available(true);
    assert_eq!(stores.tickers().get("BTC").await.unwrap(), Lookup::NotFound);
}

#[tokio::test]
async fn test_tick_schedule_drives_passes() {
    let (_, stores) = memory_stores();
    bootstrap(&stores).await;
    let setting = stores.info().get().await.unwrap().into_option().unwrap().rebalance_tick_setting;

    let mut passes = Vec::new();
    for _ in 0..7 {
        let current = stores.ticks().get().await.unwrap().into_option().unwrap().tick_count;
        let next = current + 1;
        assert_eq!(stores.ticks().update(next).await.unwrap(), TickUpdate::Updated);
        if coordinator::rebalance_due(next, setting) {
            passes.push(next);
        }
    }
    assert_eq!(passes, vec![3, 6]);
}

#[tokio::test]
async fn test_removing_coin_clears_dependents() {
    let (_, stores) = memory_stores();
    let now = Utc::now();
    stores.supported().create("XRP").await.unwrap();
    stores.tickers().create("XRP", dec!(0.00001), dec!(0.6), now).await.unwrap();
    stores.balances().create("XRP", dec!(0.1), dec!(6000), dec!(10000), now).await.unwrap();
    stores.index().create("XRP", dec!(10), dec!(0), SoftLockFlag::CLEAR).await.unwrap();

    assert_eq!(stores.supported().remove("XRP").await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(stores.tickers().get("XRP").await.unwrap(), Lookup::NotFound);
    assert_eq!(stores.balances().get("XRP").await.unwrap(), Lookup::NotFound);
    assert_eq!(stores.index().get("XRP").await.unwrap(), Lookup::NotFound);

    let err = stores.tickers().create("XRP", dec!(0.00001), dec!(0.6), now).await.unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedCoin(_)));
}
