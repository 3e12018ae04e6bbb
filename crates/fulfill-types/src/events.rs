//! Event types published by the fulfillment engine.
//!
//! Events flow through a broadcast bus so observability collaborators can
//! follow order progress without polling the store. They carry identifiers and
//! outcomes only; consumers re-read the store for full snapshots.

use serde::{Deserialize, Serialize};

/// Main event type encompassing all fulfillment events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FulfillmentEvent {
	/// Events emitted by the order facade and state machine.
	Order(OrderEvent),
	/// Events emitted by the monitoring scheduler.
	Monitor(MonitorEvent),
}

/// Order lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A new order was persisted in `pending`.
	Created { order_id: String },
	/// An order entered `monitoring` with the given deadline.
	MonitoringStarted { order_id: String, deadline: u64 },
	/// A credential was bound and the order is fulfilled.
	Fulfilled { order_id: String, attempts: u32 },
	/// The attempt budget ran out without confirmation.
	Failed { order_id: String, attempts: u32 },
	/// The monitoring deadline passed without confirmation.
	Expired { order_id: String, attempts: u32 },
}

/// Monitoring loop events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorEvent {
	/// The verifier call for an order failed and was treated as not confirmed.
	VerificationFailed { order_id: String, error: String },
	/// A persistence failure aborted an order's transition for this cycle.
	TransitionAborted { order_id: String, error: String },
	/// A poll cycle finished.
	CycleCompleted { examined: usize, transitioned: usize },
}
