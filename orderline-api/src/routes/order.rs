//! Order Lookup Routes
//!
//! `GET /order/:id` returns the order as JSON. Unknown ids are a 404 and
//! every other failure is a bare 500; error detail goes to the log only.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use orderline_core::Order;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::services::OrderService;

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Clone)]
pub struct OrderState {
    pub service: OrderService,
}

impl OrderState {
    pub fn new(service: OrderService) -> Self {
        Self { service }
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /order/:id - Look up one order
pub async fn get_order(
    State(state): State<Arc<OrderState>>,
    Path(order_uid): Path<String>,
) -> ApiResult<Json<Arc<Order>>> {
    let order_uid = order_uid.trim();
    if order_uid.is_empty() {
        return Err(ApiError::missing_field("id"));
    }

    let order = state.service.get_by_id(order_uid).await?;
    Ok(Json(order))
}

/// GET /order/ - Lookup without an id
pub async fn missing_order_id() -> ApiError {
    ApiError::missing_field("id")
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(service: OrderService) -> Router {
    let state = Arc::new(OrderState::new(service));

    Router::new()
        .route("/order/", get(missing_order_id))
        .route("/order/:id", get(get_order))
        .with_state(state)
}
