//! HTTP server for the fulfillment API.
//!
//! Exposes order creation and lookup plus credential redemption under `/api`.

use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::Json,
	routing::{get, post},
	Router,
};
use fulfill_config::ApiConfig;
use fulfill_core::FulfillmentEngine;
use fulfill_types::{
	APIError, CreateOrderRequest, CredentialResponse, ListOrdersQuery, ListOrdersResponse,
	OrderResponse, RedeemRequest,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<FulfillmentEngine>,
}

/// Builds the router with every route nested under `/api`.
pub fn router(engine: Arc<FulfillmentEngine>) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_create_order).get(handle_list_orders))
				.route("/orders/{id}", get(handle_get_order_by_id))
				.route("/credentials/redeem", post(handle_redeem))
				.route("/credentials/{value}", get(handle_get_credential)),
		)
		.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
		.with_state(AppState { engine })
}

/// Binds the configured address and serves the API until the task is dropped.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<FulfillmentEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Fulfillment API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

async fn handle_create_order(
	State(state): State<AppState>,
	Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), APIError> {
	let order = crate::apis::order::create_order(request, &state.engine).await?;
	Ok((StatusCode::CREATED, Json(order)))
}

async fn handle_list_orders(
	State(state): State<AppState>,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ListOrdersResponse>, APIError> {
	crate::apis::order::list_orders(&query.requester, &state.engine)
		.await
		.map(Json)
}

async fn handle_get_order_by_id(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<OrderResponse>, APIError> {
	crate::apis::order::get_order_by_id(&id, &state.engine)
		.await
		.map(Json)
}

async fn handle_redeem(
	State(state): State<AppState>,
	Json(request): Json<RedeemRequest>,
) -> Result<Json<CredentialResponse>, APIError> {
	crate::apis::credential::redeem(request, &state.engine)
		.await
		.map(Json)
}

async fn handle_get_credential(
	Path(value): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<CredentialResponse>, APIError> {
	crate::apis::credential::get_credential(&value, &state.engine)
		.await
		.map(Json)
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::{to_bytes, Body};
	use axum::http::{header, Request};
	use fulfill_core::{EventBus, ManualClock};
	use fulfill_storage::implementations::memory::MemoryStorage;
	use fulfill_storage::StorageService;
	use fulfill_types::{ErrorResponse, MonitoringPolicy, OrderStatus};
	use fulfill_verifier::implementations::scripted::ScriptedVerifier;
	use fulfill_verifier::VerifierService;
	use serde::de::DeserializeOwned;
	use std::time::Duration;
	use tower::ServiceExt;

	fn engine(confirm: bool) -> Arc<FulfillmentEngine> {
		Arc::new(FulfillmentEngine::new(
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			Arc::new(VerifierService::new(
				Box::new(ScriptedVerifier::new(confirm)),
				Duration::from_secs(5),
			)),
			MonitoringPolicy::default(),
			Arc::new(ManualClock::new(1_000)),
			EventBus::new(16),
		))
	}

	async fn send<T: DeserializeOwned>(
		app: &Router,
		request: Request<Body>,
	) -> (StatusCode, T) {
		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		(status, serde_json::from_slice(&body).unwrap())
	}

	fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
		Request::post(uri)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	fn get(uri: &str) -> Request<Body> {
		Request::get(uri).body(Body::empty()).unwrap()
	}

	#[tokio::test]
	async fn test_order_lifecycle_over_http() {
		let engine = engine(true);
		let app = router(engine.clone());

		let (status, created): (_, OrderResponse) = send(
			&app,
			post_json("/api/orders", serde_json::json!({"requester": "alice", "item_id": 42})),
		)
		.await;
		engine.scheduler().stop();
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(created.status, OrderStatus::Monitoring);

		engine.run_cycle().await.unwrap();

		let (status, order): (_, OrderResponse) =
			send(&app, get(&format!("/api/orders/{}", created.id))).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(order.status, OrderStatus::Fulfilled);
		let value = order.credential.unwrap();

		let (status, listed): (_, ListOrdersResponse) =
			send(&app, get("/api/orders?requester=ALICE")).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(listed.orders.len(), 1);

		let (status, credential): (_, CredentialResponse) =
			send(&app, get(&format!("/api/credentials/{}", value))).await;
		assert_eq!(status, StatusCode::OK);
		assert!(!credential.used);

		let (status, redeemed): (_, CredentialResponse) = send(
			&app,
			post_json("/api/credentials/redeem", serde_json::json!({"value": value})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert!(redeemed.used);
		assert_eq!(redeemed.order_id, created.id);

		let (status, error): (_, ErrorResponse) = send(
			&app,
			post_json("/api/credentials/redeem", serde_json::json!({"value": value})),
		)
		.await;
		assert_eq!(status, StatusCode::CONFLICT);
		assert_eq!(error.error, "CREDENTIAL_ALREADY_USED");
	}

	#[tokio::test]
	async fn test_invalid_order_is_rejected() {
		let app = router(engine(false));
		let (status, error): (_, ErrorResponse) = send(
			&app,
			post_json("/api/orders", serde_json::json!({"requester": " ", "item_id": 1})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(error.error, "VALIDATION_ERROR");
	}

	#[tokio::test]
	async fn test_unknown_records_are_not_found() {
		let app = router(engine(false));

		let (status, error): (_, ErrorResponse) = send(&app, get("/api/orders/missing")).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(error.error, "ORDER_NOT_FOUND");

		let (status, error): (_, ErrorResponse) =
			send(&app, get("/api/credentials/AAAA-BBBB-CCCC-DDDD")).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(error.error, "CREDENTIAL_NOT_FOUND");
	}
}
