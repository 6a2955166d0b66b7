//! Identifier types shared by the store, domain and API layers.

pub mod types;

pub use types::{OrderId, ReservationId, Sku};
