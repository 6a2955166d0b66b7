//! Product catalog keyed by SKU.

use common::Sku;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use store::{Store, StoreError};

use crate::error::{Rejection, Result};
use crate::stock::{self, MOVEMENT_REASON_INITIAL};
use crate::validate;

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: i64,
    pub sku: Sku,
    pub name: String,
}

/// Outcome of [`ProductCatalog::upsert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertedProduct {
    pub product: Product,
    /// The `initial_qty` the caller asked for.
    pub initial_qty: i64,
    /// Stock quantity after the call.
    pub quantity: i64,
    /// True if the SKU did not exist before.
    pub created: bool,
}

/// Owns product records.
#[derive(Clone)]
pub struct ProductCatalog {
    store: Store,
}

impl ProductCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates a product, or renames it if the SKU already exists.
    ///
    /// The stock row is raised to `initial_qty` if it is currently lower and is
    /// never lowered. Only an actual increase is recorded as an `initial`
    /// movement, so the movement log always sums to the stock quantity.
    #[tracing::instrument(skip(self))]
    pub async fn upsert(&self, sku: &str, name: &str, initial_qty: i64) -> Result<UpsertedProduct> {
        let sku = validate::sku(sku)?;
        let name = validate::product_name(name)?;
        let initial_qty = validate::initial_quantity(initial_qty)?;

        let mut tx = self.store.begin().await?;

        // Takes the product row lock whether it inserts or updates.
        let row = sqlx::query(
            r#"
            INSERT INTO products (sku, name)
            VALUES ($1, $2)
            ON CONFLICT (sku) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, sku, name, (xmax = 0) AS inserted
            "#,
        )
        .bind(sku.as_str())
        .bind(&name)
        .fetch_one(&mut *tx)
        .await?;

        let product = row_to_product(&row)?;
        let created: bool = row.try_get("inserted")?;

        let before = stock::lock_stock(&mut tx, product.id).await?.unwrap_or(0);

        let after: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO stock (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET
                quantity = GREATEST(stock.quantity, EXCLUDED.quantity),
                updated_at = now()
            RETURNING quantity
            "#,
        )
        .bind(product.id)
        .bind(initial_qty)
        .fetch_one(&mut *tx)
        .await?;

        let increase = after - before;
        if increase > 0 {
            stock::record_movement(&mut tx, product.id, increase, MOVEMENT_REASON_INITIAL).await?;
        }

        tx.commit().await?;

        metrics::counter!("products_upserted_total").increment(1);
        tracing::info!(
            product_id = product.id,
            created,
            quantity = after,
            "product upserted"
        );

        Ok(UpsertedProduct {
            product,
            initial_qty,
            quantity: after,
            created,
        })
    }

    /// Looks up a product by SKU.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, sku: &str) -> Result<Product> {
        let sku = validate::sku(sku)?;

        let row = sqlx::query("SELECT id, sku, name FROM products WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(self.store.pool())
            .await?;

        match row {
            Some(row) => Ok(row_to_product(&row)?),
            None => Err(Rejection::SkuNotFound { sku }.into()),
        }
    }
}

/// Resolves a product and takes its row lock for the rest of the transaction.
pub(crate) async fn lock_product(
    conn: &mut PgConnection,
    sku: &Sku,
) -> std::result::Result<Option<Product>, StoreError> {
    let row = sqlx::query("SELECT id, sku, name FROM products WHERE sku = $1 FOR UPDATE")
        .bind(sku.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_product).transpose()
}

fn row_to_product(row: &PgRow) -> std::result::Result<Product, StoreError> {
    Ok(Product {
        id: row.try_get("id")?,
        sku: Sku::new(row.try_get::<String, _>("sku")?),
        name: row.try_get("name")?,
    })
}
