//! Stock ledger: current quantity per product plus an append-only movement log.
//!
//! The quantity of a product never goes below zero, and it always equals the
//! sum of the deltas recorded for that product.

use chrono::{DateTime, Utc};
use common::Sku;
use serde::Serialize;
use sqlx::{PgConnection, Row};
use store::{Store, StoreError};

use crate::catalog;
use crate::error::{Rejection, Result, ValidationError};
use crate::validate;

/// Reason recorded when upserting a product raises its stock.
pub const MOVEMENT_REASON_INITIAL: &str = "initial";

/// Reason used by `adjust` callers that do not supply one.
pub const MOVEMENT_REASON_ADJUSTMENT: &str = "adjustment";

/// Current stock of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub sku: Sku,
    pub name: String,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// One immutable entry of the movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockMovement {
    pub id: i64,
    pub product_id: i64,
    pub delta: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`StockLedger::adjust`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Adjustment {
    /// A zero delta; the store was not touched.
    Unchanged { sku: Sku },

    /// The delta was applied and recorded.
    Applied {
        sku: Sku,
        quantity_before: i64,
        quantity_after: i64,
        delta: i64,
        reason: String,
    },
}

impl Adjustment {
    /// Quantity after the adjustment, if the store was touched.
    pub fn quantity_after(&self) -> Option<i64> {
        match self {
            Adjustment::Unchanged { .. } => None,
            Adjustment::Applied { quantity_after, .. } => Some(*quantity_after),
        }
    }
}

/// Owns stock quantities and the movement log.
#[derive(Clone)]
pub struct StockLedger {
    store: Store,
}

impl StockLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Returns the current stock of a product.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, sku: &str) -> Result<StockLevel> {
        let sku = validate::sku(sku)?;

        let row = sqlx::query(
            r#"
            SELECT p.sku, p.name, s.quantity, s.updated_at
            FROM products p
            JOIN stock s ON s.product_id = p.id
            WHERE p.sku = $1
            "#,
        )
        .bind(sku.as_str())
        .fetch_optional(self.store.pool())
        .await?;

        let Some(row) = row else {
            return Err(Rejection::SkuNotFound { sku }.into());
        };

        Ok(StockLevel {
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            name: row.try_get("name")?,
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Adds a signed delta to a product's stock.
    ///
    /// Fails with `InsufficientStock` if the result would be negative and with
    /// `QuantityOverflow` if it would not fit in an `i64`; in both cases
    /// nothing is written.
    #[tracing::instrument(skip(self))]
    pub async fn adjust(&self, sku: &str, delta: i64, reason: &str) -> Result<Adjustment> {
        let sku = validate::sku(sku)?;

        if delta == 0 {
            return Ok(Adjustment::Unchanged { sku });
        }

        let mut tx = self.store.begin().await?;

        let Some(product) = catalog::lock_product(&mut tx, &sku).await? else {
            return Err(Rejection::SkuNotFound { sku }.into());
        };

        let before = lock_stock(&mut tx, product.id).await?.unwrap_or(0);
        let Some(after) = before.checked_add(delta) else {
            tracing::warn!(%sku, before, delta, "adjustment overflows stock quantity");
            return Err(ValidationError::QuantityOverflow {
                current: before,
                delta,
            }
            .into());
        };

        if after < 0 {
            metrics::counter!("stock_rejections_total").increment(1);
            tracing::warn!(%sku, before, delta, "adjustment would drive stock negative");
            return Err(Rejection::InsufficientStock {
                sku,
                current: before,
                requested: delta,
            }
            .into());
        }

        write_quantity(&mut tx, product.id, after).await?;
        record_movement(&mut tx, product.id, delta, reason).await?;

        tx.commit().await?;

        metrics::counter!("stock_adjustments_total").increment(1);
        tracing::info!(%sku, before, after, delta, reason, "stock adjusted");

        Ok(Adjustment::Applied {
            sku,
            quantity_before: before,
            quantity_after: after,
            delta,
            reason: reason.to_string(),
        })
    }

    /// Returns the movement log of a product, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn movements(&self, sku: &str) -> Result<Vec<StockMovement>> {
        let sku = validate::sku(sku)?;

        let product_id: Option<i64> = sqlx::query_scalar("SELECT id FROM products WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(self.store.pool())
            .await?;

        let Some(product_id) = product_id else {
            return Err(Rejection::SkuNotFound { sku }.into());
        };

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, delta, reason, created_at
            FROM stock_movements
            WHERE product_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<StockMovement> {
                Ok(StockMovement {
                    id: row.try_get("id")?,
                    product_id: row.try_get("product_id")?,
                    delta: row.try_get("delta")?,
                    reason: row.try_get("reason")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

/// Locks the stock row of a product and returns its quantity.
///
/// Must be called after the product row lock, never before.
pub(crate) async fn lock_stock(
    conn: &mut PgConnection,
    product_id: i64,
) -> std::result::Result<Option<i64>, StoreError> {
    let quantity = sqlx::query_scalar("SELECT quantity FROM stock WHERE product_id = $1 FOR UPDATE")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(quantity)
}

/// Overwrites the quantity of a locked stock row, creating it if missing.
pub(crate) async fn write_quantity(
    conn: &mut PgConnection,
    product_id: i64,
    quantity: i64,
) -> std::result::Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock (product_id, quantity)
        VALUES ($1, $2)
        ON CONFLICT (product_id) DO UPDATE SET
            quantity = EXCLUDED.quantity,
            updated_at = now()
        "#,
    )
    .bind(product_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn record_movement(
    conn: &mut PgConnection,
    product_id: i64,
    delta: i64,
    reason: &str,
) -> std::result::Result<(), StoreError> {
    sqlx::query("INSERT INTO stock_movements (product_id, delta, reason) VALUES ($1, $2, $3)")
        .bind(product_id)
        .bind(delta)
        .bind(reason)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_serialization_is_tagged() {
        let applied = Adjustment::Applied {
            sku: "SKU1".into(),
            quantity_before: 10,
            quantity_after: 7,
            delta: -3,
            reason: "damaged".to_string(),
        };
        let json = serde_json::to_value(&applied).unwrap();
        assert_eq!(json["outcome"], "applied");
        assert_eq!(json["quantity_before"], 10);
        assert_eq!(json["quantity_after"], 7);
        assert_eq!(applied.quantity_after(), Some(7));

        let unchanged = Adjustment::Unchanged { sku: "SKU1".into() };
        let json = serde_json::to_value(&unchanged).unwrap();
        assert_eq!(json["outcome"], "unchanged");
        assert_eq!(unchanged.quantity_after(), None);
    }
}
