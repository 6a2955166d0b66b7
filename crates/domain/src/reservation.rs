//! Reservation protocol coupling orders to the stock ledger.
//!
//! Every transition runs in one transaction and takes row locks in a fixed
//! order: order row, reservation row, product row, stock row. Two operations
//! racing on the same order or the same SKU therefore queue instead of
//! deadlocking. `mark_failed` is the only operation that uses two
//! transactions: the status change, then a compensating release.

use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, Sku};
use serde::Serialize;
use sqlx::PgConnection;
use store::{Store, StoreError};

use crate::catalog;
use crate::error::{ConflictCode, DomainError, Rejection, Result};
use crate::order::{self, OrderStatus, Reservation, row_to_reservation};
use crate::stock;
use crate::validate;

/// Outcome of [`ReservationManager::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reserved {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub reservation: Reservation,
    /// True if the order already held this reservation and nothing changed.
    pub replayed: bool,
}

/// Outcome of [`ReservationManager::release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Released {
    pub order_id: OrderId,
    /// True if an active reservation was returned to stock.
    pub released: bool,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
}

/// Outcome of [`ReservationManager::mark_paid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paid {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// False if the order was already paid.
    pub changed: bool,
}

/// Outcome of [`ReservationManager::mark_failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failed {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// False if the order was already failed.
    pub changed: bool,
    /// Result of the compensating release.
    pub release: Released,
}

/// Orchestrates orders and stock inside single transactions.
#[derive(Clone)]
pub struct ReservationManager {
    store: Store,
}

impl ReservationManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Reserves the order's item quantity and moves the order to `RESERVED`.
    ///
    /// Calling it again on a `RESERVED` order with an active reservation
    /// returns that reservation without touching stock.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, order_id: &str) -> Result<Reserved> {
        let order_id = validate::order_id(order_id)?;
        let mut tx = self.store.begin().await?;

        let Some(order) = order::lock_order(&mut tx, order_id).await? else {
            return Err(rejected(Rejection::OrderNotFound { order_id }));
        };

        if !order.status.can_reserve() {
            return Err(rejected(Rejection::conflict(
                order_id,
                ConflictCode::OrderNotReservable,
                order.status,
            )));
        }

        if order.status == OrderStatus::Reserved
            && let Some(existing) = lock_active_reservation(&mut tx, order_id).await?
        {
            tx.commit().await?;
            metrics::counter!("reservations_total", "outcome" => "replayed").increment(1);
            tracing::info!(%order_id, reservation_id = %existing.id, "reservation already held");
            return Ok(Reserved {
                order_id,
                status: OrderStatus::Reserved,
                reservation: existing,
                replayed: true,
            });
        }

        let Some(item) = order::first_item(&mut tx, order_id).await? else {
            return Err(rejected(Rejection::conflict(
                order_id,
                ConflictCode::OrderHasNoItems,
                order.status,
            )));
        };

        let Some(product) = catalog::lock_product(&mut tx, &item.sku).await? else {
            return Err(rejected(Rejection::SkuNotFound { sku: item.sku }));
        };

        let current = stock::lock_stock(&mut tx, product.id).await?.unwrap_or(0);
        if current < item.qty {
            return Err(rejected(Rejection::InsufficientStock {
                sku: item.sku,
                current,
                requested: item.qty,
            }));
        }

        stock::write_quantity(&mut tx, product.id, current - item.qty).await?;
        stock::record_movement(
            &mut tx,
            product.id,
            -item.qty,
            &format!("reserve_order:{order_id}"),
        )
        .await?;
        let reservation = insert_reservation(&mut tx, order_id, &item.sku, item.qty).await?;
        order::set_status(&mut tx, order_id, OrderStatus::Reserved).await?;

        tx.commit().await?;

        metrics::counter!("reservations_total", "outcome" => "created").increment(1);
        tracing::info!(
            %order_id,
            reservation_id = %reservation.id,
            sku = %item.sku,
            qty = item.qty,
            remaining = current - item.qty,
            "stock reserved"
        );

        Ok(Reserved {
            order_id,
            status: OrderStatus::Reserved,
            reservation,
            replayed: false,
        })
    }

    /// Returns reserved stock and cancels the order if it is still open.
    ///
    /// Safe to call repeatedly: once nothing is reserved it reports
    /// `released = false` and changes nothing on a terminal order.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, order_id: &str) -> Result<Released> {
        let order_id = validate::order_id(order_id)?;
        self.release_order(order_id).await
    }

    async fn release_order(&self, order_id: OrderId) -> Result<Released> {
        let mut tx = self.store.begin().await?;

        let Some(order) = order::lock_order(&mut tx, order_id).await? else {
            return Err(rejected(Rejection::OrderNotFound { order_id }));
        };

        if order.status == OrderStatus::Paid {
            return Err(rejected(Rejection::conflict(
                order_id,
                ConflictCode::CannotReleasePaidOrder,
                order.status,
            )));
        }

        let next_status = if order.status.can_cancel() {
            OrderStatus::Cancelled
        } else {
            order.status
        };

        let Some(active) = lock_active_reservation(&mut tx, order_id).await? else {
            if next_status != order.status {
                order::set_status(&mut tx, order_id, next_status).await?;
                tx.commit().await?;
                tracing::info!(%order_id, "order cancelled with nothing reserved");
            }
            metrics::counter!("releases_total", "released" => "false").increment(1);
            return Ok(Released {
                order_id,
                released: false,
                status: next_status,
                reservation: None,
            });
        };

        let product = catalog::lock_product(&mut tx, &active.sku)
            .await?
            .ok_or_else(|| {
                StoreError::invalid_row(
                    "reservations",
                    format!("reservation {} refers to unknown sku {}", active.id, active.sku),
                )
            })?;

        let current = stock::lock_stock(&mut tx, product.id).await?.unwrap_or(0);
        let restored = current.checked_add(active.qty).ok_or_else(|| {
            StoreError::invalid_row(
                "stock",
                format!("releasing {} onto {current} overflows", active.qty),
            )
        })?;
        stock::write_quantity(&mut tx, product.id, restored).await?;
        stock::record_movement(
            &mut tx,
            product.id,
            active.qty,
            &format!("release_order:{order_id}"),
        )
        .await?;

        let reservation = deactivate_reservation(&mut tx, active.id, Some(Utc::now())).await?;
        if next_status != order.status {
            order::set_status(&mut tx, order_id, next_status).await?;
        }

        tx.commit().await?;

        metrics::counter!("releases_total", "released" => "true").increment(1);
        tracing::info!(
            %order_id,
            reservation_id = %reservation.id,
            qty = reservation.qty,
            status = %next_status,
            "reservation released"
        );

        Ok(Released {
            order_id,
            released: true,
            status: next_status,
            reservation: Some(reservation),
        })
    }

    /// Moves an open order to `PAID`. The active reservation, if any, is
    /// consumed: it becomes inactive without returning stock.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: &str) -> Result<Paid> {
        let order_id = validate::order_id(order_id)?;
        let mut tx = self.store.begin().await?;

        let Some(order) = order::lock_order(&mut tx, order_id).await? else {
            return Err(rejected(Rejection::OrderNotFound { order_id }));
        };

        if order.status == OrderStatus::Paid {
            return Ok(Paid {
                order_id,
                status: OrderStatus::Paid,
                changed: false,
            });
        }

        if !order.status.can_pay() {
            return Err(rejected(Rejection::conflict(
                order_id,
                ConflictCode::OrderNotPayable,
                order.status,
            )));
        }

        if let Some(active) = lock_active_reservation(&mut tx, order_id).await? {
            deactivate_reservation(&mut tx, active.id, None).await?;
        }
        order::set_status(&mut tx, order_id, OrderStatus::Paid).await?;

        tx.commit().await?;

        metrics::counter!("orders_paid_total").increment(1);
        tracing::info!(%order_id, from = %order.status, "order paid");

        Ok(Paid {
            order_id,
            status: OrderStatus::Paid,
            changed: true,
        })
    }

    /// Moves an open order to `FAILED`, commits, then releases its stock in a
    /// second transaction.
    ///
    /// On an order that is already `FAILED` the status is left alone but the
    /// release still runs, so a compensation interrupted by a crash is
    /// completed by calling this again.
    #[tracing::instrument(skip(self))]
    pub async fn mark_failed(&self, order_id: &str) -> Result<Failed> {
        let order_id = validate::order_id(order_id)?;
        let mut tx = self.store.begin().await?;

        let Some(order) = order::lock_order(&mut tx, order_id).await? else {
            return Err(rejected(Rejection::OrderNotFound { order_id }));
        };

        let changed = match order.status {
            OrderStatus::Failed => false,
            OrderStatus::Paid => {
                return Err(rejected(Rejection::conflict(
                    order_id,
                    ConflictCode::CannotFailPaidOrder,
                    order.status,
                )));
            }
            status if !status.can_fail() => {
                return Err(rejected(Rejection::conflict(
                    order_id,
                    ConflictCode::OrderNotFailable,
                    order.status,
                )));
            }
            _ => {
                order::set_status(&mut tx, order_id, OrderStatus::Failed).await?;
                true
            }
        };

        tx.commit().await?;

        if changed {
            metrics::counter!("orders_failed_total").increment(1);
            tracing::info!(%order_id, from = %order.status, "order failed");
        }

        let release = self.release_order(order_id).await?;

        Ok(Failed {
            order_id,
            status: OrderStatus::Failed,
            changed,
            release,
        })
    }
}

fn rejected(rejection: Rejection) -> DomainError {
    metrics::counter!("reservation_rejections_total", "code" => rejection.code()).increment(1);
    tracing::warn!(code = rejection.code(), %rejection, "order transition rejected");
    DomainError::Rejected(rejection)
}

/// Locks the order's active reservation. Called after the order row lock.
async fn lock_active_reservation(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> std::result::Result<Option<Reservation>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, order_id, sku, qty, active, created_at, released_at
        FROM reservations
        WHERE order_id = $1 AND active
        FOR UPDATE
        "#,
    )
    .bind(order_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_reservation).transpose()
}

async fn insert_reservation(
    conn: &mut PgConnection,
    order_id: OrderId,
    sku: &Sku,
    qty: i64,
) -> std::result::Result<Reservation, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO reservations (id, order_id, sku, qty, active)
        VALUES ($1, $2, $3, $4, TRUE)
        RETURNING id, order_id, sku, qty, active, created_at, released_at
        "#,
    )
    .bind(ReservationId::new().as_uuid())
    .bind(order_id.as_uuid())
    .bind(sku.as_str())
    .bind(qty)
    .fetch_one(&mut *conn)
    .await?;

    row_to_reservation(&row)
}

/// Deactivates a reservation. `released_at` is `None` when payment consumed it.
async fn deactivate_reservation(
    conn: &mut PgConnection,
    reservation_id: ReservationId,
    released_at: Option<DateTime<Utc>>,
) -> std::result::Result<Reservation, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE reservations
        SET active = FALSE, released_at = $2
        WHERE id = $1
        RETURNING id, order_id, sku, qty, active, created_at, released_at
        "#,
    )
    .bind(reservation_id.as_uuid())
    .bind(released_at)
    .fetch_one(&mut *conn)
    .await?;

    row_to_reservation(&row)
}
