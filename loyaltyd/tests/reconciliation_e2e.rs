//! End-to-end reconciliation scenarios.
//!
//! Drives the services and the reconciler against `MemoryStore` and a
//! scripted `StubAccrual`, then checks the resulting ledgers.
//!
//! Run with: `cargo test -p loyaltyd --test reconciliation_e2e`

use std::sync::Arc;
use std::time::Duration;

use loyalty_connectors::{OracleResult, StubAccrual};
use loyalty_domain::{AccrualStatus, OrderNumber, OrderStatus, Points, UserId};
use loyalty_store::{MemoryStore, Store};
use loyaltyd::{
    BalanceService, Config, Daemon, DaemonError, OrderService, ReconcileConfig, Reconciler,
    SubmitOutcome,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

struct Harness {
    oracle: Arc<StubAccrual>,
    store: Arc<MemoryStore>,
    orders: OrderService<MemoryStore>,
    balances: BalanceService<MemoryStore>,
    reconciler: Reconciler<StubAccrual, MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        let oracle = Arc::new(StubAccrual::new());
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(
            oracle.clone(),
            store.clone(),
            ReconcileConfig {
                interval: Duration::from_millis(10),
                batch_size: 100,
                max_pause: Duration::from_secs(1),
            },
        );
        Self {
            orders: OrderService::new(store.clone()),
            balances: BalanceService::new(store.clone()),
            oracle,
            store,
            reconciler,
        }
    }
}

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn number(raw: &str) -> OrderNumber {
    OrderNumber::parse(raw).unwrap()
}

fn points(value: Decimal) -> Points {
    Points::new(value).unwrap()
}

#[tokio::test]
async fn same_user_resubmission_keeps_one_record() {
    let h = Harness::new();

    let first = h.orders.submit("79927398713", &user("alice")).await.unwrap();
    let second = h.orders.submit("79927398713", &user("alice")).await.unwrap();

    assert!(matches!(first, SubmitOutcome::Accepted(_)));
    assert!(matches!(second, SubmitOutcome::AlreadySubmitted(_)));
    assert_eq!(h.orders.list(&user("alice")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn other_user_cannot_claim_order() {
    let h = Harness::new();

    h.orders.submit("79927398713", &user("alice")).await.unwrap();
    let result = h.orders.submit("79927398713", &user("bob")).await;

    assert!(matches!(result, Err(DaemonError::OrderOwnedByAnotherUser(_))));
    let order = h.orders.get(&number("79927398713")).await.unwrap().unwrap();
    assert_eq!(order.owner, user("alice"));
}

#[tokio::test]
async fn single_digit_is_rejected_without_record() {
    let h = Harness::new();

    let result = h.orders.submit("1", &user("alice")).await;

    assert!(matches!(result, Err(DaemonError::InvalidOrderNumber(_))));
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn processed_payout_is_credited_once_across_ticks() {
    let h = Harness::new();
    let n = number("79927398713");
    h.orders.submit(n.as_str(), &user("alice")).await.unwrap();
    h.oracle.push_status(&n, AccrualStatus::Processed, Some(dec!(729.98)));

    h.reconciler.tick().await.unwrap();
    let after_first = h.balances.available(&user("alice")).await.unwrap();

    // The oracle keeps answering PROCESSED; a repeated settle must not credit again
    h.store.settle(&n, points(dec!(729.98))).await.unwrap();
    h.reconciler.tick().await.unwrap();
    let after_second = h.balances.available(&user("alice")).await.unwrap();

    assert_eq!(after_first, points(dec!(729.98)));
    assert_eq!(after_second, after_first);
    assert_eq!(h.store.credit_count(), 1);
}

#[tokio::test]
async fn withdrawals_never_overdraw() {
    let h = Harness::new();
    let n = number("79927398713");
    h.orders.submit(n.as_str(), &user("alice")).await.unwrap();
    h.oracle.push_status(&n, AccrualStatus::Processed, Some(dec!(100)));
    h.reconciler.tick().await.unwrap();

    assert!(!h.balances.can_withdraw(&user("alice"), dec!(100.5)).await.unwrap());
    let refused = h.balances.withdraw(&user("alice"), "2377225624", dec!(100.5)).await;
    assert!(matches!(refused, Err(DaemonError::InsufficientFunds { .. })));

    h.balances.withdraw(&user("alice"), "2377225624", dec!(100)).await.unwrap();
    assert_eq!(h.balances.available(&user("alice")).await.unwrap(), Points::ZERO);

    let empty = h.balances.withdraw(&user("alice"), "9278923470", dec!(0.01)).await;
    assert!(matches!(empty, Err(DaemonError::InsufficientFunds { .. })));
    assert_eq!(h.balances.withdrawn(&user("alice")).await.unwrap(), points(dec!(100)));
}

#[tokio::test]
async fn invalid_and_processed_orders_are_listed() {
    let h = Harness::new();
    let invalid = number("12345678903");
    let processed = number("79927398713");
    h.orders.submit(invalid.as_str(), &user("alice")).await.unwrap();
    h.orders.submit(processed.as_str(), &user("alice")).await.unwrap();
    h.oracle.push_status(&invalid, AccrualStatus::Invalid, None);
    h.oracle.push_status(&processed, AccrualStatus::Processed, Some(dec!(100)));

    h.reconciler.tick().await.unwrap();

    let orders = h.orders.list(&user("alice")).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].number, invalid);
    assert_eq!(orders[0].status, OrderStatus::Invalid);
    assert_eq!(orders[0].accrual, None);
    assert_eq!(orders[1].status, OrderStatus::Processed);
    assert_eq!(orders[1].accrual, Some(points(dec!(100))));
    assert_eq!(h.balances.available(&user("alice")).await.unwrap(), points(dec!(100)));
}

#[tokio::test]
async fn concurrent_submissions_of_fresh_number() {
    let h = Harness::new();
    let mut tasks = tokio::task::JoinSet::new();

    for _ in 0..50 {
        let orders = h.orders.clone();
        tasks.spawn(async move { orders.submit("4561261212345467", &user("alice")).await });
    }

    let mut successes = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 50);
    assert_eq!(h.store.order_count(), 1);
}

#[tokio::test]
async fn rate_limit_halts_tick_then_resumes() {
    let h = Harness::new();
    for raw in ["79927398713", "12345678903", "2377225624"] {
        h.orders.submit(raw, &user("alice")).await.unwrap();
    }
    let open = h.store.orders().find_unsettled(None, 10).await.unwrap();
    let numbers: Vec<OrderNumber> = open.iter().map(|o| o.number.clone()).collect();
    h.oracle.push_status(&numbers[0], AccrualStatus::Processing, None);
    h.oracle.push(&numbers[1], OracleResult::RateLimited { retry_after: None });
    h.oracle.push_status(&numbers[1], AccrualStatus::Processing, None);
    h.oracle.push_status(&numbers[2], AccrualStatus::Processing, None);

    let limited = h.reconciler.tick().await.unwrap();
    assert!(limited.rate_limited);
    assert_eq!(h.oracle.queries_for(&numbers[2]), 0);
    let skipped = h.orders.get(&numbers[1]).await.unwrap().unwrap();
    assert_eq!(skipped.status, OrderStatus::New);

    // The next tick picks up at the rate-limited order
    h.oracle.reset_queries();
    let resumed = h.reconciler.tick().await.unwrap();
    assert!(!resumed.rate_limited);
    assert_eq!(resumed.examined, 2);
    assert_eq!(h.oracle.queries_for(&numbers[0]), 0);
    for n in &numbers {
        let order = h.orders.get(n).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
    }

    let wrapped = h.reconciler.tick().await.unwrap();
    assert_eq!(wrapped.examined, 3);
}

#[tokio::test]
async fn unresolved_backlog_does_not_starve_newer_orders() {
    let h = Harness::new();
    for i in 0..100 {
        let backlog = OrderNumber::with_check_digit(&format!("{}", 100_000 + i)).unwrap();
        h.orders.submit(backlog.as_str(), &user("alice")).await.unwrap();
    }
    let fresh = number("79927398713");
    h.orders.submit(fresh.as_str(), &user("bob")).await.unwrap();
    h.oracle.push_status(&fresh, AccrualStatus::Processed, Some(dec!(100)));

    h.reconciler.tick().await.unwrap();
    h.reconciler.tick().await.unwrap();

    let order = h.orders.get(&fresh).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(h.oracle.queries_for(&fresh), 1);
    assert_eq!(h.balances.available(&user("bob")).await.unwrap(), points(dec!(100)));
}

#[tokio::test]
async fn withdrawal_target_cannot_be_claimed_by_another_user() {
    let h = Harness::new();
    let n = number("79927398713");
    h.orders.submit(n.as_str(), &user("alice")).await.unwrap();
    h.oracle.push_status(&n, AccrualStatus::Processed, Some(dec!(50)));
    h.reconciler.tick().await.unwrap();

    h.balances.withdraw(&user("alice"), "2377225624", dec!(10)).await.unwrap();
    let claimed = h.orders.submit("2377225624", &user("bob")).await;

    assert!(matches!(claimed, Err(DaemonError::OrderOwnedByAnotherUser(_))));
    let target = h.orders.get(&number("2377225624")).await.unwrap().unwrap();
    assert_eq!(target.owner, user("alice"));
}

#[tokio::test]
async fn running_daemon_settles_in_background() {
    let oracle = Arc::new(StubAccrual::new());
    let store = Arc::new(MemoryStore::new());
    let n = number("79927398713");
    oracle.push_status(&n, AccrualStatus::Processed, Some(dec!(42)));

    let shutdown = CancellationToken::new();
    let running = Daemon::new(Config::test(), oracle.clone(), store.clone())
        .start(shutdown.clone())
        .await
        .unwrap();

    OrderService::new(store.clone()).submit(n.as_str(), &user("alice")).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = store.balances().snapshot(&user("alice")).await.unwrap();
        if snapshot.credited == points(dec!(42)) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "credit never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running.wait()).await.unwrap();
}
