//! Order types for the fulfillment system.
//!
//! An order asks for one item to be released to one requester once the
//! external marketplace confirms the underlying purchase. The types here
//! carry the persisted record and the policy that bounds how long and how
//! often it is checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A fulfillment order tracked from creation to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Unique, immutable identifier for this order.
	pub id: String,
	/// Identity of the requester (e.g. a marketplace username).
	pub requester: String,
	/// Identifier of the item the requester must have acquired.
	pub item_id: u64,
	/// Current lifecycle status.
	pub status: OrderStatus,
	/// Unix timestamp (seconds) when the order was created.
	pub created_at: u64,
	/// Unix timestamp (seconds) of the last persisted change.
	pub updated_at: u64,
	/// Unix timestamp (seconds) after which monitoring must stop.
	///
	/// Fixed when the order enters `Monitoring` and never extended.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub monitoring_deadline: Option<u64>,
	/// Number of verification checks performed for this order.
	pub attempts: u32,
	/// Redemption credential, present only once the order is fulfilled.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub credential: Option<String>,
}

impl Order {
	/// Creates a new order in the `Pending` state.
	pub fn new(id: String, requester: String, item_id: u64, now: u64) -> Self {
		Self {
			id,
			requester,
			item_id,
			status: OrderStatus::Pending,
			created_at: now,
			updated_at: now,
			monitoring_deadline: None,
			attempts: 0,
			credential: None,
		}
	}

	/// Returns true if the order can no longer change.
	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Returns true if the deadline has been crossed at `now`.
	///
	/// An order without a deadline never expires.
	pub fn is_expired_at(&self, now: u64) -> bool {
		self.monitoring_deadline.is_some_and(|deadline| now > deadline)
	}
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Created, not yet submitted for monitoring.
	Pending,
	/// Actively polled against the verifier.
	Monitoring,
	/// Purchase confirmed and credential issued.
	Fulfilled,
	/// Attempt budget exhausted without confirmation.
	Failed,
	/// Monitoring deadline passed before confirmation.
	Expired,
}

impl OrderStatus {
	/// Terminal states are absorbing.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Fulfilled | OrderStatus::Failed | OrderStatus::Expired
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderStatus::Pending => write!(f, "pending"),
			OrderStatus::Monitoring => write!(f, "monitoring"),
			OrderStatus::Fulfilled => write!(f, "fulfilled"),
			OrderStatus::Failed => write!(f, "failed"),
			OrderStatus::Expired => write!(f, "expired"),
		}
	}
}

/// Bounds on how long and how often an order is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoringPolicy {
	/// Time between poll cycles.
	pub poll_interval: Duration,
	/// Maximum time an order stays in `Monitoring`.
	pub max_duration: Duration,
	/// Maximum number of verification checks per order.
	pub max_attempts: u32,
	/// Maximum number of verifier calls in flight during one cycle.
	pub max_concurrency: usize,
	/// Upper bound on a single verifier call.
	pub verification_timeout: Duration,
}

impl Default for MonitoringPolicy {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(30),
			max_duration: Duration::from_secs(24 * 60 * 60),
			max_attempts: 20,
			max_concurrency: 16,
			verification_timeout: Duration::from_secs(10),
		}
	}
}
