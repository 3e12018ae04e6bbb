//! API types for the fulfillment HTTP endpoints.
//!
//! Request and response bodies plus the structured error type that maps the
//! engine's error taxonomy onto HTTP status codes.

use crate::{Credential, Order, OrderStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request body for `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	/// Requester identity, validated by an upstream collaborator.
	pub requester: String,
	/// Item the requester must acquire.
	pub item_id: u64,
}

/// Query string for `GET /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOrdersQuery {
	pub requester: String,
}

/// Order snapshot returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
	pub id: String,
	pub requester: String,
	pub item_id: u64,
	pub status: OrderStatus,
	pub created_at: u64,
	pub updated_at: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub monitoring_deadline: Option<u64>,
	pub attempts: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub credential: Option<String>,
}

impl From<Order> for OrderResponse {
	fn from(order: Order) -> Self {
		Self {
			id: order.id,
			requester: order.requester,
			item_id: order.item_id,
			status: order.status,
			created_at: order.created_at,
			updated_at: order.updated_at,
			monitoring_deadline: order.monitoring_deadline,
			attempts: order.attempts,
			credential: order.credential,
		}
	}
}

/// Response body for `GET /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOrdersResponse {
	pub orders: Vec<OrderResponse>,
}

/// Request body for `POST /api/credentials/redeem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
	pub value: String,
}

/// Credential state returned by the API. The value itself is never echoed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialResponse {
	pub order_id: String,
	pub used: bool,
	pub issued_at: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub redeemed_at: Option<u64>,
}

impl From<Credential> for CredentialResponse {
	fn from(credential: Credential) -> Self {
		Self {
			order_id: credential.order_id,
			used: credential.used,
			issued_at: credential.issued_at,
			redeemed_at: credential.redeemed_at,
		}
	}
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Machine-readable error code.
	pub error: String,
	/// Human-readable description.
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed input (400)
	BadRequest { error_type: String, message: String },
	/// Unknown order or credential (404)
	NotFound { error_type: String, message: String },
	/// State conflict such as a credential already redeemed (409)
	Conflict { error_type: String, message: String },
	/// Transient backend failure (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
}

impl APIError {
	/// HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::ServiceUnavailable { .. } => 503,
		}
	}

	/// Converts to the serializable body.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error_type, message, retry_after) = match self {
			APIError::BadRequest { error_type, message }
			| APIError::NotFound { error_type, message }
			| APIError::Conflict { error_type, message } => (error_type, message, None),
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => (error_type, message, *retry_after),
		};
		ErrorResponse {
			error: error_type.clone(),
			message: message.clone(),
			details: None,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			APIError::ServiceUnavailable { message, .. } => {
				write!(f, "Service Unavailable: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
