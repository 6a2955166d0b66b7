//! Orders and their status state machine.

mod lifecycle;
mod model;
mod status;

pub use lifecycle::OrderLifecycle;
pub use model::{Order, OrderDetails, OrderItem, Reservation};
pub use status::{OrderStatus, UnknownStatus};

pub(crate) use lifecycle::{first_item, lock_order, set_status};
pub(crate) use model::row_to_reservation;
