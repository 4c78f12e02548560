//! HTTP API for the order placement pipeline.
//!
//! Exposes placement, cancellation, staff status changes, public tracking,
//! cart and coupon validation, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use checkout::{CheckoutConfig, LoggingNotificationSender, OrderAssembler, OrderLifecycle};
use metrics_exporter_prometheus::PrometheusHandle;
use store::CommerceStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CommerceStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place::<S>))
        .route("/orders/track/{order_number}", get(routes::orders::track::<S>))
        .route(
            "/orders/{order_number}/cancel",
            patch(routes::orders::cancel::<S>),
        )
        .route(
            "/orders/{order_number}/status",
            put(routes::orders::update_status::<S>),
        )
        .route("/cart/validate", post(routes::cart::validate::<S>))
        .route("/coupons/validate", post(routes::coupons::validate::<S>))
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

/// Wires the placement and lifecycle services over one store.
pub fn create_default_state<S: CommerceStore + Clone + 'static>(
    store: S,
    config: CheckoutConfig,
) -> Arc<AppState<S>> {
    let lifecycle = OrderLifecycle::new(store.clone(), LoggingNotificationSender, config.restock);
    let assembler = OrderAssembler::new(store, LoggingNotificationSender, config);

    Arc::new(AppState {
        assembler,
        lifecycle,
    })
}
