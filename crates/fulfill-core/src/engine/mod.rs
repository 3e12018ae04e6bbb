//! Order facade of the fulfillment engine.
//!
//! [`FulfillmentEngine`] is the surface used by the API layer: it creates
//! orders and hands them to the monitoring scheduler, serves order snapshots
//! and exposes credential redemption. All monitoring itself happens in the
//! scheduler.

pub mod event_bus;
pub mod lifecycle;

use crate::clock::Clock;
use crate::credential::{CredentialError, CredentialIssuer};
use crate::monitoring::{CycleReport, MonitorScheduler};
use crate::state::{OrderStateError, OrderStateMachine};
use fulfill_storage::StorageService;
use fulfill_types::{
	truncate_id, Credential, FulfillmentEvent, MonitoringPolicy, Order, OrderEvent,
};
use fulfill_verifier::VerifierService;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Malformed input; never retried.
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Credential already used")]
	AlreadyUsed,
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<OrderStateError> for EngineError {
	fn from(err: OrderStateError) -> Self {
		match err {
			OrderStateError::OrderNotFound(id) => EngineError::NotFound(format!("order {}", id)),
			other => EngineError::Storage(other.to_string()),
		}
	}
}

impl From<CredentialError> for EngineError {
	fn from(err: CredentialError) -> Self {
		match err {
			CredentialError::NotFound => EngineError::NotFound("credential".into()),
			CredentialError::AlreadyUsed => EngineError::AlreadyUsed,
			other => EngineError::Storage(other.to_string()),
		}
	}
}

/// Fulfillment engine: order facade plus the scheduler it drives.
#[derive(Clone)]
pub struct FulfillmentEngine {
	pub(crate) storage: Arc<StorageService>,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) issuer: Arc<CredentialIssuer>,
	pub(crate) scheduler: Arc<MonitorScheduler>,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) event_bus: event_bus::EventBus,
}

impl FulfillmentEngine {
	/// Wires the engine's components around a storage backend and verifier.
	pub fn new(
		storage: Arc<StorageService>,
		verifier: Arc<VerifierService>,
		policy: MonitoringPolicy,
		clock: Arc<dyn Clock>,
		event_bus: event_bus::EventBus,
	) -> Self {
		let state_machine = Arc::new(OrderStateMachine::new(storage.clone(), policy));
		let issuer = Arc::new(CredentialIssuer::new(storage.clone(), clock.clone()));
		let scheduler = Arc::new(MonitorScheduler::new(
			state_machine.clone(),
			issuer.clone(),
			verifier,
			clock.clone(),
			event_bus.clone(),
		));

		Self {
			storage,
			state_machine,
			issuer,
			scheduler,
			clock,
			event_bus,
		}
	}

	/// Creates an order for `requester` and `item_id` and starts monitoring it.
	///
	/// The returned order is already in `monitoring` with its deadline set.
	pub async fn create_order(&self, requester: &str, item_id: u64) -> Result<Order, EngineError> {
		let requester = requester.trim();
		if requester.is_empty() {
			return Err(EngineError::Validation("requester must not be empty".into()));
		}
		if item_id == 0 {
			return Err(EngineError::Validation("item_id must be positive".into()));
		}

		let order = Order::new(
			uuid::Uuid::new_v4().to_string(),
			requester.to_string(),
			item_id,
			self.clock.now(),
		);
		self.state_machine.create(&order).await?;
		tracing::info!(order_id = %truncate_id(&order.id), item_id, "Order created");
		self.event_bus
			.publish(FulfillmentEvent::Order(OrderEvent::Created {
				order_id: order.id.clone(),
			}))
			.ok();

		Ok(self.scheduler.watch(&order.id).await?)
	}

	/// Returns the current snapshot of an order.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, EngineError> {
		Ok(self.state_machine.get_order(order_id).await?)
	}

	/// Returns every order created by `requester`, oldest first.
	///
	/// Identities match case-insensitively.
	pub async fn list_orders(&self, requester: &str) -> Result<Vec<Order>, EngineError> {
		if requester.trim().is_empty() {
			return Err(EngineError::Validation("requester must not be empty".into()));
		}
		Ok(self.state_machine.orders_for_requester(requester).await?)
	}

	/// Redeems a credential. Succeeds at most once per value.
	pub async fn redeem(&self, value: &str) -> Result<Credential, EngineError> {
		if value.trim().is_empty() {
			return Err(EngineError::Validation("credential must not be empty".into()));
		}
		Ok(self.issuer.redeem(value).await?)
	}

	/// Looks up a credential without changing it.
	pub async fn credential(&self, value: &str) -> Result<Credential, EngineError> {
		Ok(self.issuer.get(value).await?)
	}

	/// Returns true if the credential exists and is unused.
	pub async fn is_redeemable(&self, value: &str) -> Result<bool, EngineError> {
		Ok(self.issuer.is_redeemable(value).await?)
	}

	/// Runs one monitoring cycle immediately.
	pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
		Ok(self.scheduler.run_cycle().await?)
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn scheduler(&self) -> &Arc<MonitorScheduler> {
		&self.scheduler
	}
}
