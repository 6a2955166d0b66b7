//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Reserved ──► Paid
///    │           │
///    ├───────────┴──► Cancelled
///    └───────────┴──► Failed   (followed by a compensating release)
/// ```
///
/// `Pending` may also go straight to `Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created, no stock held.
    #[default]
    Pending,

    /// Stock is held by an active reservation.
    Reserved,

    /// Payment confirmed (terminal state).
    Paid,

    /// Order was cancelled (terminal state).
    Cancelled,

    /// Order failed (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if stock can be reserved in this status.
    pub fn can_reserve(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Reserved)
    }

    /// Returns true if the order can be marked paid in this status.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Reserved)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Reserved)
    }

    /// Returns true if the order can be marked failed in this status.
    pub fn can_fail(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Reserved)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Reserved => "RESERVED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a stored status string is not a known status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown order status {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "RESERVED" => Ok(OrderStatus::Reserved),
            "PAID" => Ok(OrderStatus::Paid),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
