//! Order records as read from the store.

use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, Sku};
use serde::Serialize;
use sqlx::Row;
use sqlx::postgres::PgRow;
use store::StoreError;
use uuid::Uuid;

use super::OrderStatus;

/// An order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single line item of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub sku: Sku,
    pub qty: i64,
}

/// A hold against stock tied to one order.
///
/// An inactive reservation with `released_at` set was released back to
/// stock; an inactive one without it was consumed by payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    pub sku: Sku,
    pub qty: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Returns true if payment consumed the reserved stock.
    pub fn is_consumed(&self) -> bool {
        !self.active && self.released_at.is_none()
    }
}

/// An order together with its items and every reservation ever made for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub reservations: Vec<Reservation>,
}

impl OrderDetails {
    /// Returns the active reservation, if any.
    pub fn active_reservation(&self) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.active)
    }
}

pub(crate) fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
    let status = row
        .try_get::<String, _>("status")?
        .parse::<OrderStatus>()
        .map_err(|e| StoreError::invalid_row("orders", e.to_string()))?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn row_to_item(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        sku: Sku::new(row.try_get::<String, _>("sku")?),
        qty: row.try_get("qty")?,
    })
}

pub(crate) fn row_to_reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        sku: Sku::new(row.try_get::<String, _>("sku")?),
        qty: row.try_get("qty")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        released_at: row.try_get("released_at")?,
    })
}
