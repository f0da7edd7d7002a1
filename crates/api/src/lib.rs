//! HTTP API server with observability for the order lifecycle engine.
//!
//! Provides REST endpoints for booking, lifecycle operations and the gateway
//! webhook, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::LifecycleStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use state::{AppState, Collaborators, LoggingDispatcher, create_state, seed_policies};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LifecycleStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/audit", get(routes::orders::audit::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/reschedule", post(routes::orders::reschedule::<S>))
        .route("/orders/{id}/status", post(routes::orders::update_status::<S>))
        .route("/orders/{id}/force-status", post(routes::orders::force_status::<S>))
        .route("/orders/{id}/quote", post(routes::orders::submit_quote::<S>))
        .route("/orders/{id}/quote/approve", post(routes::orders::approve_quote::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/webhooks/gateway", post(routes::webhooks::receive::<S>))
        .route("/admin/gateway", get(routes::admin::gateway_status::<S>))
        .route("/admin/gateway/reset", post(routes::admin::reset_gateway::<S>))
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
