//! Inventory and order reservation engine.
//!
//! This crate provides the four components built on the transactional store:
//! - [`ProductCatalog`]: products keyed by a unique SKU
//! - [`StockLedger`]: quantity per product and its append-only movement log
//! - [`OrderLifecycle`]: single-item orders and their status state machine
//! - [`ReservationManager`]: reserve / release / pay / fail, coupling the two
//!
//! Each public operation runs as one transaction. Business rule failures come
//! back as [`DomainError::Rejected`] and leave no trace in the store.

pub mod catalog;
pub mod error;
pub mod order;
pub mod reservation;
pub mod stock;
pub mod validate;

use store::Store;

pub use catalog::{Product, ProductCatalog, UpsertedProduct};
pub use error::{ConflictCode, DomainError, Rejection, RejectionKind, Result, ValidationError};
pub use order::{Order, OrderDetails, OrderItem, OrderLifecycle, OrderStatus, Reservation};
pub use reservation::{Failed, Paid, Released, ReservationManager, Reserved};
pub use stock::{Adjustment, StockLedger, StockLevel, StockMovement};

/// All components wired to one store handle.
#[derive(Clone)]
pub struct Inventory {
    pub catalog: ProductCatalog,
    pub stock: StockLedger,
    pub orders: OrderLifecycle,
    pub reservations: ReservationManager,
    store: Store,
}

impl Inventory {
    pub fn new(store: Store) -> Self {
        Self {
            catalog: ProductCatalog::new(store.clone()),
            stock: StockLedger::new(store.clone()),
            orders: OrderLifecycle::new(store.clone()),
            reservations: ReservationManager::new(store.clone()),
            store,
        }
    }

    /// Returns the shared store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }
}
