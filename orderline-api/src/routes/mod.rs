//! HTTP Routes
//!
//! - Lookup page (`/`) and its assets (`/static/*`)
//! - Order lookup (`/order/:id`)
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics (`/metrics`)

pub mod health;
pub mod order;

use std::sync::Arc;

use axum::{middleware::from_fn, routing::get, Router};
use orderline_storage::OrderStore;
use tower::ServiceBuilder;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::services::OrderService;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use health::create_router as health_router;
pub use order::create_router as order_router;

/// Build the full HTTP router.
///
/// Layers, outermost first: request timeout, tracing, metrics.
pub fn create_router(
    service: OrderService,
    store: Arc<dyn OrderStore>,
    http: &HttpConfig,
) -> Router {
    let cache = Arc::clone(service.cache());
    let index = ServeFile::new(http.static_dir.join("index.html"));

    Router::new()
        .route_service("/", index)
        .nest_service("/static", ServeDir::new(&http.static_dir))
        .merge(order::create_router(service))
        .nest("/health", health::create_router(store, cache))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(http.request_timeout))
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(observability_middleware)),
        )
}
