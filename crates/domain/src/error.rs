//! Domain error types.
//!
//! Two classes of failure are kept apart on purpose:
//! - [`ValidationError`]: the caller sent malformed input. Detected before a
//!   connection is acquired, except for a stock delta that overflows the
//!   stored quantity; surfaced as a hard failure.
//! - [`Rejection`]: the input was well-formed but the business rules refuse
//!   the operation in the current state. Detected inside the transaction,
//!   which is rolled back; surfaced as a typed, soft outcome.

use common::{OrderId, Sku};
use store::StoreError;
use thiserror::Error;

use crate::order::OrderStatus;

/// Caller input that can never succeed, whatever the stored state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("initial_qty must be >= 0, got {0}")]
    NegativeInitialQuantity(i64),

    #[error("qty must be > 0, got {0}")]
    NonPositiveQuantity(i64),

    #[error("order_id looks invalid: {0:?}")]
    MalformedOrderId(String),

    #[error("sku must not be empty")]
    EmptySku,

    #[error("name must not be empty")]
    EmptyName,

    /// The resulting stock quantity does not fit in an `i64`.
    #[error("delta {delta} overflows stock quantity {current}")]
    QuantityOverflow { current: i64, delta: i64 },
}

/// Broad category of a [`Rejection`], as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    NotFound,
    StateConflict,
    InsufficientStock,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::NotFound => "NotFoundError",
            RejectionKind::StateConflict => "StateConflictError",
            RejectionKind::InsufficientStock => "InsufficientStockError",
        }
    }
}

/// Why an order could not make the requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictCode {
    OrderNotReservable,
    OrderHasNoItems,
    CannotReleasePaidOrder,
    OrderNotPayable,
    CannotFailPaidOrder,
    OrderNotFailable,
}

impl ConflictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::OrderNotReservable => "ORDER_NOT_RESERVABLE",
            ConflictCode::OrderHasNoItems => "ORDER_HAS_NO_ITEMS",
            ConflictCode::CannotReleasePaidOrder => "CANNOT_RELEASE_PAID_ORDER",
            ConflictCode::OrderNotPayable => "ORDER_NOT_PAYABLE",
            ConflictCode::CannotFailPaidOrder => "CANNOT_FAIL_PAID_ORDER",
            ConflictCode::OrderNotFailable => "ORDER_NOT_FAILABLE",
        }
    }
}

impl std::fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business rule refused the operation. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("SKU not found: {sku}")]
    SkuNotFound { sku: Sku },

    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    #[error("{code}: order {order_id} is {status}")]
    StateConflict {
        order_id: OrderId,
        code: ConflictCode,
        status: OrderStatus,
    },

    /// `requested` is the signed delta for adjustments and the reserved
    /// quantity for reservations.
    #[error("Insufficient stock for {sku}: current {current}, requested {requested}")]
    InsufficientStock {
        sku: Sku,
        current: i64,
        requested: i64,
    },
}

impl Rejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::SkuNotFound { .. } => "SKU_NOT_FOUND",
            Rejection::OrderNotFound { .. } => "ORDER_NOT_FOUND",
            Rejection::StateConflict { code, .. } => code.as_str(),
            Rejection::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::SkuNotFound { .. } | Rejection::OrderNotFound { .. } => {
                RejectionKind::NotFound
            }
            Rejection::StateConflict { .. } => RejectionKind::StateConflict,
            Rejection::InsufficientStock { .. } => RejectionKind::InsufficientStock,
        }
    }

    pub(crate) fn conflict(order_id: OrderId, code: ConflictCode, status: OrderStatus) -> Self {
        Rejection::StateConflict {
            order_id,
            code,
            status,
        }
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed caller input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The operation was refused by a business rule.
    #[error("Rejected: {0}")]
    Rejected(#[from] Rejection),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Returns the rejection if this is a business outcome.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            DomainError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DomainError::Validation(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Store(StoreError::Database(err))
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
