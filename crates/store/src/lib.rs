//! Transactional store for the inventory and order reservation engine.
//!
//! The store owns the PostgreSQL connection pool. Components above it open
//! one transaction per operation and take row locks with `SELECT ... FOR UPDATE`
//! in a fixed order: order row, reservation row, product row, stock row.

pub mod config;
pub mod error;
pub mod postgres;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use postgres::{Store, Tx};

/// Re-exported so callers can write helpers that run inside a transaction.
pub use sqlx::PgConnection;
