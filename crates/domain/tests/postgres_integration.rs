//! PostgreSQL integration tests for the reservation engine.
//!
//! These tests use a shared PostgreSQL container for efficiency and clear
//! every table before each test, so they run serially.
//! Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_integration
//! ```

use std::sync::Arc;

use domain::{
    Adjustment, ConflictCode, DomainError, Inventory, OrderStatus, Rejection, RejectionKind,
    ValidationError,
};
use serial_test::serial;
use store::{Store, StoreConfig};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let store = Store::connect(&StoreConfig::new(&connection_string))
                .await
                .unwrap();
            store.run_migrations().await.unwrap();
            store.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh pool per test, every table cleared.
async fn get_test_inventory() -> Inventory {
    let info = get_container_info().await;
    let store = Store::connect(&StoreConfig::new(&info.connection_string))
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE reservations, order_items, orders, stock_movements, stock, products RESTART IDENTITY",
    )
    .execute(store.pool())
    .await
    .unwrap();

    Inventory::new(store)
}

async fn quantity(inv: &Inventory, sku: &str) -> i64 {
    inv.stock.get(sku).await.unwrap().quantity
}

async fn ledger_sum(inv: &Inventory, sku: &str) -> i64 {
    inv.stock
        .movements(sku)
        .await
        .unwrap()
        .iter()
        .map(|m| m.delta)
        .sum()
}

async fn new_order(inv: &Inventory, sku: &str, qty: i64) -> String {
    let (order, _) = inv.orders.create(sku, qty).await.unwrap();
    order.id.to_string()
}

fn rejection(err: DomainError) -> Rejection {
    match err {
        DomainError::Rejected(rejection) => rejection,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

fn conflict_code(err: DomainError) -> ConflictCode {
    match rejection(err) {
        Rejection::StateConflict { code, .. } => code,
        other => panic!("expected a state conflict, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn scenario_a_reserve_then_pay() {
    let inv = get_test_inventory().await;

    let upserted = inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    assert!(upserted.created);
    assert_eq!(upserted.quantity, 10);
    assert_eq!(quantity(&inv, "SKU1").await, 10);

    let (order, item) = inv.orders.create("SKU1", 3).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(item.qty, 3);
    let oid = order.id.to_string();

    let reserved = inv.reservations.reserve(&oid).await.unwrap();
    assert_eq!(reserved.status, OrderStatus::Reserved);
    assert!(reserved.reservation.active);
    assert!(!reserved.replayed);
    assert_eq!(quantity(&inv, "SKU1").await, 7);

    let paid = inv.reservations.mark_paid(&oid).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.changed);

    let err = inv.reservations.reserve(&oid).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::OrderNotReservable);

    // payment consumes the reservation; stock stays reserved
    let details = inv.orders.get(&oid).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert!(details.active_reservation().is_none());
    assert!(details.reservations[0].is_consumed());
    assert_eq!(quantity(&inv, "SKU1").await, 7);
    assert_eq!(ledger_sum(&inv, "SKU1").await, 7);
}

#[tokio::test]
#[serial]
async fn scenario_b_insufficient_stock_changes_nothing() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU2", "Gadget", 2).await.unwrap();
    let oid = new_order(&inv, "SKU2", 5).await;

    let err = inv.reservations.reserve(&oid).await.unwrap_err();
    let rejection = rejection(err);
    assert_eq!(rejection.kind(), RejectionKind::InsufficientStock);
    assert_eq!(
        rejection,
        Rejection::InsufficientStock {
            sku: "SKU2".into(),
            current: 2,
            requested: 5,
        }
    );

    assert_eq!(quantity(&inv, "SKU2").await, 2);
    let details = inv.orders.get(&oid).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
    assert!(details.reservations.is_empty());
    assert_eq!(inv.stock.movements("SKU2").await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn scenario_c_mark_failed_restores_stock() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    let oid = new_order(&inv, "SKU1", 4).await;

    inv.reservations.reserve(&oid).await.unwrap();
    assert_eq!(quantity(&inv, "SKU1").await, 6);

    let failed = inv.reservations.mark_failed(&oid).await.unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    assert!(failed.changed);
    assert!(failed.release.released);
    assert_eq!(failed.release.status, OrderStatus::Failed);

    assert_eq!(quantity(&inv, "SKU1").await, 10);
    let details = inv.orders.get(&oid).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Failed);
    assert!(details.active_reservation().is_none());
    assert!(details.reservations[0].released_at.is_some());
    assert_eq!(ledger_sum(&inv, "SKU1").await, 10);
}

#[tokio::test]
#[serial]
async fn reserve_twice_returns_same_reservation() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    let oid = new_order(&inv, "SKU1", 3).await;

    let first = inv.reservations.reserve(&oid).await.unwrap();
    let second = inv.reservations.reserve(&oid).await.unwrap();

    assert!(second.replayed);
    assert_eq!(first.reservation, second.reservation);
    assert_eq!(quantity(&inv, "SKU1").await, 7);
    assert_eq!(inv.stock.movements("SKU1").await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn reserve_then_release_round_trips() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    let oid = new_order(&inv, "SKU1", 3).await;

    inv.reservations.reserve(&oid).await.unwrap();
    let released = inv.reservations.release(&oid).await.unwrap();
    assert!(released.released);
    assert_eq!(released.status, OrderStatus::Cancelled);
    assert_eq!(quantity(&inv, "SKU1").await, 10);

    let again = inv.reservations.release(&oid).await.unwrap();
    assert!(!again.released);
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!(quantity(&inv, "SKU1").await, 10);

    let movements = inv.stock.movements("SKU1").await.unwrap();
    let reasons: Vec<String> = movements.iter().map(|m| m.reason.clone()).collect();
    assert_eq!(
        reasons,
        vec![
            "initial".to_string(),
            format!("reserve_order:{oid}"),
            format!("release_order:{oid}"),
        ]
    );
    assert_eq!(ledger_sum(&inv, "SKU1").await, 10);
}

#[tokio::test]
#[serial]
async fn release_without_reservation_cancels_open_order() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    let oid = new_order(&inv, "SKU1", 3).await;

    let released = inv.reservations.release(&oid).await.unwrap();
    assert!(!released.released);
    assert_eq!(released.status, OrderStatus::Cancelled);
    assert!(released.reservation.is_none());

    let details = inv.orders.get(&oid).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Cancelled);
    assert_eq!(quantity(&inv, "SKU1").await, 10);
}

#[tokio::test]
#[serial]
async fn terminal_orders_do_not_transition() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();

    let cancelled = new_order(&inv, "SKU1", 1).await;
    inv.reservations.release(&cancelled).await.unwrap();

    let err = inv.reservations.reserve(&cancelled).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::OrderNotReservable);
    let err = inv.reservations.mark_paid(&cancelled).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::OrderNotPayable);
    let err = inv.reservations.mark_failed(&cancelled).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::OrderNotFailable);

    let paid = new_order(&inv, "SKU1", 2).await;
    inv.reservations.reserve(&paid).await.unwrap();
    inv.reservations.mark_paid(&paid).await.unwrap();

    let err = inv.reservations.release(&paid).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::CannotReleasePaidOrder);
    let err = inv.reservations.mark_failed(&paid).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::CannotFailPaidOrder);
    let again = inv.reservations.mark_paid(&paid).await.unwrap();
    assert!(!again.changed);

    let failed = new_order(&inv, "SKU1", 3).await;
    inv.reservations.mark_failed(&failed).await.unwrap();
    let err = inv.reservations.reserve(&failed).await.unwrap_err();
    assert_eq!(conflict_code(err), ConflictCode::OrderNotReservable);
    let released = inv.reservations.release(&failed).await.unwrap();
    assert!(!released.released);
    assert_eq!(released.status, OrderStatus::Failed);

    assert_eq!(
        inv.orders.get(&cancelled).await.unwrap().order.status,
        OrderStatus::Cancelled
    );
    assert_eq!(
        inv.orders.get(&paid).await.unwrap().order.status,
        OrderStatus::Paid
    );
    assert_eq!(
        inv.orders.get(&failed).await.unwrap().order.status,
        OrderStatus::Failed
    );
    assert_eq!(quantity(&inv, "SKU1").await, 8);
    assert_eq!(ledger_sum(&inv, "SKU1").await, 8);
}

#[tokio::test]
#[serial]
async fn mark_failed_replay_completes_interrupted_compensation() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    let oid = new_order(&inv, "SKU1", 4).await;
    inv.reservations.reserve(&oid).await.unwrap();

    // first transaction of mark_failed committed, release never ran
    sqlx::query("UPDATE orders SET status = 'FAILED' WHERE id = $1::uuid")
        .bind(&oid)
        .execute(inv.store().pool())
        .await
        .unwrap();
    assert_eq!(quantity(&inv, "SKU1").await, 6);

    let failed = inv.reservations.mark_failed(&oid).await.unwrap();
    assert!(!failed.changed);
    assert!(failed.release.released);
    assert_eq!(quantity(&inv, "SKU1").await, 10);

    let replay = inv.reservations.mark_failed(&oid).await.unwrap();
    assert!(!replay.release.released);
    assert_eq!(quantity(&inv, "SKU1").await, 10);
}

#[tokio::test]
#[serial]
async fn upsert_never_lowers_stock_and_keeps_ledger_identity() {
    let inv = get_test_inventory().await;

    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();
    let renamed = inv.catalog.upsert("SKU1", "Widget Pro", 4).await.unwrap();
    assert!(!renamed.created);
    assert_eq!(renamed.product.name, "Widget Pro");
    assert_eq!(renamed.initial_qty, 4);
    assert_eq!(renamed.quantity, 10);

    let raised = inv.catalog.upsert("SKU1", "Widget Pro", 15).await.unwrap();
    assert_eq!(raised.quantity, 15);

    let level = inv.stock.get("SKU1").await.unwrap();
    assert_eq!(level.name, "Widget Pro");
    assert_eq!(level.quantity, 15);

    let deltas: Vec<i64> = inv
        .stock
        .movements("SKU1")
        .await
        .unwrap()
        .iter()
        .map(|m| m.delta)
        .collect();
    assert_eq!(deltas, vec![10, 5]);

    let empty = inv.catalog.upsert("SKU0", "Nothing", 0).await.unwrap();
    assert_eq!(empty.quantity, 0);
    assert!(inv.stock.movements("SKU0").await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn adjust_applies_signed_deltas_and_refuses_negative() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 5).await.unwrap();

    let added = inv.stock.adjust("SKU1", 3, "restock").await.unwrap();
    assert_eq!(
        added,
        Adjustment::Applied {
            sku: "SKU1".into(),
            quantity_before: 5,
            quantity_after: 8,
            delta: 3,
            reason: "restock".to_string(),
        }
    );

    let err = inv.stock.adjust("SKU1", -9, "shrinkage").await.unwrap_err();
    assert_eq!(
        rejection(err),
        Rejection::InsufficientStock {
            sku: "SKU1".into(),
            current: 8,
            requested: -9,
        }
    );
    assert_eq!(quantity(&inv, "SKU1").await, 8);

    let drained = inv.stock.adjust("SKU1", -8, "shrinkage").await.unwrap();
    assert_eq!(drained.quantity_after(), Some(0));

    let unchanged = inv.stock.adjust("SKU1", 0, "noop").await.unwrap();
    assert_eq!(unchanged, Adjustment::Unchanged { sku: "SKU1".into() });

    assert_eq!(inv.stock.movements("SKU1").await.unwrap().len(), 3);
    assert_eq!(ledger_sum(&inv, "SKU1").await, 0);
}

#[tokio::test]
#[serial]
async fn adjust_overflow_is_refused_without_writing() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("SKU1", "Widget", 10).await.unwrap();

    let err = inv.stock.adjust("SKU1", i64::MAX, "restock").await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Validation(ValidationError::QuantityOverflow {
            current: 10,
            delta: i64::MAX,
        })
    ));

    assert_eq!(quantity(&inv, "SKU1").await, 10);
    assert_eq!(inv.stock.movements("SKU1").await.unwrap().len(), 1);
    assert_eq!(ledger_sum(&inv, "SKU1").await, 10);

    let err = inv.stock.adjust("SKU1", i64::MIN, "shrinkage").await.unwrap_err();
    assert_eq!(rejection(err).kind(), RejectionKind::InsufficientStock);
    assert_eq!(quantity(&inv, "SKU1").await, 10);
}

#[tokio::test]
#[serial]
async fn unknown_keys_are_not_found() {
    let inv = get_test_inventory().await;

    let err = inv.stock.get("NOPE").await.unwrap_err();
    assert_eq!(rejection(err).code(), "SKU_NOT_FOUND");
    let err = inv.stock.adjust("NOPE", 1, "x").await.unwrap_err();
    assert_eq!(rejection(err).code(), "SKU_NOT_FOUND");
    let err = inv.catalog.get("NOPE").await.unwrap_err();
    assert_eq!(rejection(err).code(), "SKU_NOT_FOUND");

    let missing = common::OrderId::new().to_string();
    for result in [
        inv.orders.get(&missing).await.map(|_| ()),
        inv.reservations.reserve(&missing).await.map(|_| ()),
        inv.reservations.release(&missing).await.map(|_| ()),
        inv.reservations.mark_paid(&missing).await.map(|_| ()),
        inv.reservations.mark_failed(&missing).await.map(|_| ()),
    ] {
        assert_eq!(rejection(result.unwrap_err()).code(), "ORDER_NOT_FOUND");
    }

    // orders accept unknown SKUs; reservation reports them
    let oid = new_order(&inv, "GHOST", 1).await;
    let err = inv.reservations.reserve(&oid).await.unwrap_err();
    assert_eq!(
        rejection(err),
        Rejection::SkuNotFound {
            sku: "GHOST".into()
        }
    );
}

#[tokio::test]
#[serial]
async fn invalid_input_fails_before_touching_the_store() {
    let inv = get_test_inventory().await;

    let err = inv.catalog.upsert("SKU1", "Widget", -1).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Validation(ValidationError::NegativeInitialQuantity(-1))
    ));
    let err = inv.orders.create("SKU1", 0).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Validation(ValidationError::NonPositiveQuantity(0))
    ));
    let err = inv.reservations.reserve("not-an-id").await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Validation(ValidationError::MalformedOrderId(_))
    ));

    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(inv.store().pool())
        .await
        .unwrap();
    assert_eq!(products, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("HOT", "Hot item", 5).await.unwrap();

    let mut order_ids = Vec::new();
    for _ in 0..20 {
        order_ids.push(new_order(&inv, "HOT", 1).await);
    }

    let handles: Vec<_> = order_ids
        .into_iter()
        .map(|oid| {
            let inv = inv.clone();
            tokio::spawn(async move { inv.reservations.reserve(&oid).await })
        })
        .collect();

    let mut reserved = 0;
    let mut short = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => reserved += 1,
            Err(err) => {
                assert_eq!(rejection(err).kind(), RejectionKind::InsufficientStock);
                short += 1;
            }
        }
    }

    assert_eq!(reserved, 5);
    assert_eq!(short, 15);
    assert_eq!(quantity(&inv, "HOT").await, 0);
    assert_eq!(ledger_sum(&inv, "HOT").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_adjustments_and_reservations_stay_non_negative() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("HOT", "Hot item", 10).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..30 {
        let inv = inv.clone();
        if i % 3 == 0 {
            let oid = new_order(&inv, "HOT", 2).await;
            handles.push(tokio::spawn(async move {
                inv.reservations.reserve(&oid).await.map(|_| ())
            }));
        } else {
            handles.push(tokio::spawn(async move {
                inv.stock.adjust("HOT", -1, "pick").await.map(|_| ())
            }));
        }
    }

    for handle in handles {
        if let Err(err) = handle.await.unwrap() {
            assert_eq!(rejection(err).kind(), RejectionKind::InsufficientStock);
        }
    }

    let remaining = quantity(&inv, "HOT").await;
    assert!(remaining >= 0);
    assert_eq!(remaining, ledger_sum(&inv, "HOT").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn order_reads_see_status_and_reservation_together() {
    let inv = get_test_inventory().await;
    inv.catalog.upsert("HOT", "Hot item", 100).await.unwrap();

    let mut order_ids = Vec::new();
    for _ in 0..10 {
        order_ids.push(new_order(&inv, "HOT", 1).await);
    }

    let writers: Vec<_> = order_ids
        .iter()
        .cloned()
        .map(|oid| {
            let inv = inv.clone();
            tokio::spawn(async move { inv.reservations.reserve(&oid).await.map(|_| ()) })
        })
        .collect();

    let readers: Vec<_> = order_ids
        .iter()
        .cloned()
        .map(|oid| {
            let inv = inv.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let details = inv.orders.get(&oid).await.unwrap();
                    let held = details.active_reservation().is_some();
                    match details.order.status {
                        OrderStatus::Pending => assert!(!held),
                        OrderStatus::Reserved => assert!(held),
                        other => panic!("unexpected status {other}"),
                    }
                }
            })
        })
        .collect();

    for handle in writers {
        handle.await.unwrap().unwrap();
    }
    for handle in readers {
        handle.await.unwrap();
    }

    assert_eq!(quantity(&inv, "HOT").await, 90);
}
