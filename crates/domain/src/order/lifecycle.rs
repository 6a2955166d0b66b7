//! Order creation, lookup and the row-level helpers shared with reservations.

use common::OrderId;
use sqlx::PgConnection;
use store::{Store, StoreError};

use super::model::{row_to_item, row_to_order, row_to_reservation};
use super::{Order, OrderDetails, OrderItem, OrderStatus};
use crate::error::{Rejection, Result};
use crate::validate;

/// Owns order headers and their items.
#[derive(Clone)]
pub struct OrderLifecycle {
    store: Store,
}

impl OrderLifecycle {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates a `PENDING` order with a single item.
    ///
    /// The SKU is not checked here; an unknown SKU is reported when the
    /// order is reserved.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, sku: &str, qty: i64) -> Result<(Order, OrderItem)> {
        let sku = validate::sku(sku)?;
        let qty = validate::order_quantity(qty)?;
        let order_id = OrderId::new();

        let mut tx = self.store.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (id, status)
            VALUES ($1, $2)
            RETURNING id, status, created_at, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(OrderStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let order = row_to_order(&row)?;

        sqlx::query("INSERT INTO order_items (order_id, sku, qty) VALUES ($1, $2, $3)")
            .bind(order_id.as_uuid())
            .bind(sku.as_str())
            .bind(qty)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(%order_id, %sku, qty, "order created");

        Ok((order, OrderItem { order_id, sku, qty }))
    }

    /// Loads an order with its items and reservations.
    ///
    /// All three reads come from one read-only snapshot, so a transition
    /// committed in between is seen either entirely or not at all.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, order_id: &str) -> Result<OrderDetails> {
        let order_id = validate::order_id(order_id)?;

        let mut tx = self.store.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT id, status, created_at, updated_at FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(Rejection::OrderNotFound { order_id }.into());
        };
        let order = row_to_order(&row)?;

        let items = sqlx::query("SELECT order_id, sku, qty FROM order_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(row_to_item)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let reservations = sqlx::query(
            r#"
            SELECT id, order_id, sku, qty, active, created_at, released_at
            FROM reservations
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(row_to_reservation)
        .collect::<std::result::Result<Vec<_>, _>>()?;

        tx.commit().await?;

        Ok(OrderDetails {
            order,
            items,
            reservations,
        })
    }
}

/// Takes the order row lock. First lock of every order transition.
pub(crate) async fn lock_order(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> std::result::Result<Option<Order>, StoreError> {
    let row = sqlx::query(
        "SELECT id, status, created_at, updated_at FROM orders WHERE id = $1 FOR UPDATE",
    )
    .bind(order_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_order).transpose()
}

/// Returns the order's single item, if it has one.
pub(crate) async fn first_item(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> std::result::Result<Option<OrderItem>, StoreError> {
    let row = sqlx::query("SELECT order_id, sku, qty FROM order_items WHERE order_id = $1 LIMIT 1")
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_item).transpose()
}

/// Writes a new status on a locked order row.
pub(crate) async fn set_status(
    conn: &mut PgConnection,
    order_id: OrderId,
    status: OrderStatus,
) -> std::result::Result<(), StoreError> {
    sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
