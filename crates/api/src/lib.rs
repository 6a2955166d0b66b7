//! Operation registry and HTTP boundary for the inventory and order
//! reservation engine.
//!
//! Every operation is reachable through the [`OperationRegistry`]; the HTTP
//! routes are a thin wrapper around it, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod operations;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::Inventory;
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use operations::{OperationDescriptor, OperationError, OperationRegistry};

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<OperationRegistry>,
    pub store: Store,
}

/// Builds the application state over one store handle.
pub fn create_state(store: Store) -> AppState {
    let registry = OperationRegistry::inventory(Inventory::new(store.clone()));
    AppState {
        registry: Arc::new(registry),
        store,
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/operations", get(routes::operations::list))
        .route("/operations/{name}", post(routes::operations::invoke))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
