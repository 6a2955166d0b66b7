//! Input checks run before any connection is acquired.

use common::{OrderId, Sku};
use uuid::Uuid;

use crate::error::ValidationError;

/// Shortest string accepted as an order identifier (a UUID is 36 chars).
pub const MIN_ORDER_ID_LEN: usize = 30;

/// Trims and checks an order identifier.
pub fn order_id(raw: &str) -> Result<OrderId, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.len() < MIN_ORDER_ID_LEN {
        return Err(ValidationError::MalformedOrderId(raw.to_string()));
    }
    Uuid::parse_str(trimmed)
        .map(OrderId::from_uuid)
        .map_err(|_| ValidationError::MalformedOrderId(raw.to_string()))
}

pub fn sku(raw: &str) -> Result<Sku, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptySku);
    }
    Ok(Sku::new(trimmed))
}

pub fn product_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(trimmed.to_string())
}

pub fn initial_quantity(qty: i64) -> Result<i64, ValidationError> {
    if qty < 0 {
        return Err(ValidationError::NegativeInitialQuantity(qty));
    }
    Ok(qty)
}

pub fn order_quantity(qty: i64) -> Result<i64, ValidationError> {
    if qty <= 0 {
        return Err(ValidationError::NonPositiveQuantity(qty));
    }
    Ok(qty)
}
