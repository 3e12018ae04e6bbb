//! Order endpoints.
//!
//! Creating an order puts it straight into monitoring; the engine's scheduler
//! takes it from there. Clients poll `GET /api/orders/{id}` for the outcome.

use super::engine_error;
use fulfill_core::FulfillmentEngine;
use fulfill_types::{
	truncate_id, APIError, CreateOrderRequest, ListOrdersResponse, OrderResponse,
};
use tracing::{info, warn};

const ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";

/// Handles POST /api/orders.
pub async fn create_order(
	request: CreateOrderRequest,
	engine: &FulfillmentEngine,
) -> Result<OrderResponse, APIError> {
	match engine.create_order(&request.requester, request.item_id).await {
		Ok(order) => {
			info!(order_id = %truncate_id(&order.id), "Accepted order");
			Ok(order.into())
		},
		Err(e) => {
			warn!(error = %e, "Order creation failed");
			Err(engine_error(e, ORDER_NOT_FOUND))
		},
	}
}

/// Handles GET /api/orders/{id}.
pub async fn get_order_by_id(id: &str, engine: &FulfillmentEngine) -> Result<OrderResponse, APIError> {
	engine
		.get_order(id)
		.await
		.map(OrderResponse::from)
		.map_err(|e| engine_error(e, ORDER_NOT_FOUND))
}

/// Handles GET /api/orders?requester=...
pub async fn list_orders(
	requester: &str,
	engine: &FulfillmentEngine,
) -> Result<ListOrdersResponse, APIError> {
	let orders = engine
		.list_orders(requester)
		.await
		.map_err(|e| engine_error(e, ORDER_NOT_FOUND))?;
	Ok(ListOrdersResponse {
		orders: orders.into_iter().map(OrderResponse::from).collect(),
	})
}
