//! Operation registry.
//!
//! Maps an operation name to a handler with one uniform contract:
//! JSON input in, JSON payload or [`OperationError`] out. Business
//! rejections are not errors here: they come back as `{"ok": false, ...}`
//! payloads so callers can branch on the `error` code. Only malformed input,
//! unknown operations and infrastructure failures are hard errors.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use domain::stock::MOVEMENT_REASON_ADJUSTMENT;
use domain::{DomainError, Inventory, Rejection};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Name reported by the `health` operation.
pub const SERVICE_NAME: &str = "inventory-reservation-engine";

/// Hard failures of an operation call.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The input could not be parsed or failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Static description of a registered operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

type HandlerFuture = BoxFuture<'static, Result<Value, OperationError>>;
type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Immutable once built; share it behind an `Arc`.
#[derive(Default)]
pub struct OperationRegistry {
    operations: BTreeMap<&'static str, (OperationDescriptor, Handler)>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler taking a typed input.
    ///
    /// A `null` input is treated as `{}`. Input that does not deserialize into
    /// `I` fails with `InvalidInput` without calling the handler. Registering
    /// a name twice replaces the previous handler.
    pub fn register<I, F, Fut>(&mut self, name: &'static str, description: &'static str, handler: F)
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        let erased: Handler = Arc::new(move |input: Value| {
            let input = if input.is_null() {
                Value::Object(Map::new())
            } else {
                input
            };
            match serde_json::from_value::<I>(input) {
                Ok(input) => handler(input).boxed(),
                Err(e) => futures_util::future::ready(Err(OperationError::InvalidInput(
                    e.to_string(),
                )))
                .boxed(),
            }
        });

        self.operations
            .insert(name, (OperationDescriptor { name, description }, erased));
    }

    /// Builds the registry of every inventory operation.
    pub fn inventory(inventory: Inventory) -> Self {
        let mut registry = Self::new();

        registry.register("health", "Report that the service is up.", |_: NoInput| async {
            Ok::<_, OperationError>(json!({ "ok": true, "service": SERVICE_NAME }))
        });

        let inv = inventory.clone();
        registry.register(
            "upsert_product",
            "Create a product or rename it; raise its stock to initial_qty if lower.",
            move |input: UpsertProductInput| {
                let inv = inv.clone();
                async move {
                    respond(
                        inv.catalog
                            .upsert(&input.sku, &input.name, input.initial_qty)
                            .await,
                    )
                }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "get_stock",
            "Return the current stock of a product.",
            move |input: SkuInput| {
                let inv = inv.clone();
                async move { respond(inv.stock.get(&input.sku).await) }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "adjust_stock",
            "Add a signed delta to a product's stock; never goes below zero.",
            move |input: AdjustStockInput| {
                let inv = inv.clone();
                async move {
                    respond(
                        inv.stock
                            .adjust(&input.sku, input.delta, &input.reason)
                            .await,
                    )
                }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "list_movements",
            "Return the stock movement log of a product, oldest first.",
            move |input: SkuInput| {
                let inv = inv.clone();
                async move {
                    let sku = input.sku;
                    respond(
                        inv.stock
                            .movements(&sku)
                            .await
                            .map(|movements| json!({ "sku": sku.trim(), "movements": movements })),
                    )
                }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "create_order",
            "Create a PENDING order with a single item.",
            move |input: CreateOrderInput| {
                let inv = inv.clone();
                async move {
                    respond(inv.orders.create(&input.sku, input.qty).await.map(
                        |(order, item)| {
                            json!({
                                "order_id": order.id,
                                "status": order.status,
                                "sku": item.sku,
                                "qty": item.qty,
                            })
                        },
                    ))
                }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "get_order",
            "Return an order with its items and reservations.",
            move |input: OrderIdInput| {
                let inv = inv.clone();
                async move {
                    respond(inv.orders.get(&input.order_id).await.map(|details| {
                        json!({
                            "order_id": details.order.id,
                            "status": details.order.status,
                            "created_at": details.order.created_at,
                            "updated_at": details.order.updated_at,
                            "items": details.items,
                            "reservations": details.reservations,
                        })
                    }))
                }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "reserve_for_order",
            "Reserve stock for an order and mark it RESERVED.",
            move |input: OrderIdInput| {
                let inv = inv.clone();
                async move { respond(inv.reservations.reserve(&input.order_id).await) }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "release_stock",
            "Return an order's reserved stock and cancel the order if still open.",
            move |input: OrderIdInput| {
                let inv = inv.clone();
                async move { respond(inv.reservations.release(&input.order_id).await) }
            },
        );

        let inv = inventory.clone();
        registry.register(
            "mark_paid",
            "Mark an open order PAID.",
            move |input: OrderIdInput| {
                let inv = inv.clone();
                async move { respond(inv.reservations.mark_paid(&input.order_id).await) }
            },
        );

        let inv = inventory;
        registry.register(
            "mark_failed",
            "Mark an order FAILED and release any stock it still holds.",
            move |input: OrderIdInput| {
                let inv = inv.clone();
                async move { respond(inv.reservations.mark_failed(&input.order_id).await) }
            },
        );

        registry
    }

    /// Invokes an operation by name.
    #[tracing::instrument(skip(self, input))]
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value, OperationError> {
        let Some((descriptor, handler)) = self.operations.get(name) else {
            return Err(OperationError::UnknownOperation(name.to_string()));
        };

        let start = Instant::now();
        let result = handler(input).await;

        let outcome = match &result {
            Ok(payload) if payload["ok"] == true => "ok",
            Ok(_) => "rejected",
            Err(OperationError::Internal(e)) => {
                tracing::error!(error = %e, "operation failed");
                "error"
            }
            Err(_) => "invalid",
        };
        metrics::counter!(
            "operations_invoked_total",
            "operation" => descriptor.name,
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("operation_duration_seconds", "operation" => descriptor.name)
            .record(start.elapsed().as_secs_f64());

        result
    }

    /// Returns true if an operation with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.operations.keys().copied().collect()
    }

    /// Registered operation descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<OperationDescriptor> {
        self.operations
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }
}

// -- Inputs --

#[derive(Deserialize)]
struct NoInput {}

#[derive(Deserialize)]
struct UpsertProductInput {
    sku: String,
    name: String,
    #[serde(default)]
    initial_qty: i64,
}

#[derive(Deserialize)]
struct SkuInput {
    sku: String,
}

#[derive(Deserialize)]
struct AdjustStockInput {
    sku: String,
    delta: i64,
    #[serde(default = "default_reason")]
    reason: String,
}

fn default_reason() -> String {
    MOVEMENT_REASON_ADJUSTMENT.to_string()
}

#[derive(Deserialize)]
struct CreateOrderInput {
    sku: String,
    qty: i64,
}

#[derive(Deserialize)]
struct OrderIdInput {
    order_id: String,
}

// -- Payloads --

/// Turns a domain result into an operation payload.
fn respond<T: Serialize>(result: domain::Result<T>) -> Result<Value, OperationError> {
    match result {
        Ok(value) => success(&value),
        Err(DomainError::Rejected(rejection)) => Ok(rejection_payload(&rejection)),
        Err(DomainError::Validation(e)) => Err(OperationError::InvalidInput(e.to_string())),
        Err(DomainError::Store(e)) => Err(OperationError::Internal(e.to_string())),
    }
}

/// Serializes a result and marks it `"ok": true`.
pub fn success<T: Serialize>(value: &T) -> Result<Value, OperationError> {
    let mut payload = match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
        Err(e) => return Err(OperationError::Internal(e.to_string())),
    };
    payload.insert("ok".to_string(), Value::Bool(true));
    Ok(Value::Object(payload))
}

/// The soft-failure payload for a business rejection.
pub fn rejection_payload(rejection: &Rejection) -> Value {
    let mut payload = json!({
        "ok": false,
        "error": rejection.code(),
        "kind": rejection.kind().as_str(),
        "message": rejection.to_string(),
    });

    let details = match rejection {
        Rejection::SkuNotFound { sku } => json!({ "sku": sku }),
        Rejection::OrderNotFound { order_id } => json!({ "order_id": order_id }),
        Rejection::StateConflict {
            order_id, status, ..
        } => json!({ "order_id": order_id, "status": status }),
        Rejection::InsufficientStock {
            sku,
            current,
            requested,
        } => json!({ "sku": sku, "current_qty": current, "requested": requested }),
    };

    if let (Value::Object(payload), Value::Object(details)) = (&mut payload, details) {
        payload.extend(details);
    }
    payload
}
