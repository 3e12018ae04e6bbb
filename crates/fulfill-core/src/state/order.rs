//! Order state machine implementation.
//!
//! Orders move `pending -> monitoring` when submitted, then from `monitoring`
//! to exactly one of the absorbing states `fulfilled`, `failed` or `expired`.
//! The decision logic ([`check`] and [`advance`]) is pure; the
//! [`OrderStateMachine`] persists its results with compare-and-swap against
//! the snapshot the decision was based on, so a concurrent writer can never
//! be silently overwritten.

use fulfill_storage::{StorageError, StorageService, Versioned};
use fulfill_types::{normalize_identity, MonitoringPolicy, Order, OrderStatus, StorageKey};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	/// The record changed since it was read; nothing was written.
	#[error("Concurrent update of order {0}")]
	Conflict(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order not found: {0}")]
	OrderNotFound(String),
}

impl OrderStateError {
	fn from_storage(order_id: &str, err: StorageError) -> Self {
		match err {
			StorageError::NotFound => OrderStateError::OrderNotFound(order_id.to_string()),
			StorageError::Conflict(_) => OrderStateError::Conflict(order_id.to_string()),
			other => OrderStateError::Storage(other.to_string()),
		}
	}
}

/// What a poll cycle must do with a monitored order before any external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
	/// The deadline has passed.
	Expire,
	/// The attempt budget is spent.
	Exhaust,
	/// Ask the verifier.
	Verify,
}

/// Decides whether a monitored order may be verified at `now`.
///
/// Expiry wins over the attempt budget, and both are decided before the
/// verifier is called.
pub fn check(order: &Order, policy: &MonitoringPolicy, now: u64) -> Check {
	if order.is_expired_at(now) {
		Check::Expire
	} else if order.attempts >= policy.max_attempts {
		Check::Exhaust
	} else {
		Check::Verify
	}
}

/// A transition out of `monitoring`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
	Expire,
	Exhaust,
	/// The verifier was queried and did not confirm (or failed).
	NotConfirmed,
	/// The verifier confirmed; `credential` is bound to the order.
	Confirmed { credential: String },
}

/// Computes the order that results from applying `step` at `now`.
///
/// A verifier query counts as one attempt whatever its answer; reaching the
/// budget on an unconfirmed query fails the order immediately.
pub fn advance(
	order: &Order,
	step: Step,
	policy: &MonitoringPolicy,
	now: u64,
) -> Result<Order, OrderStateError> {
	let mut next = order.clone();
	match step {
		Step::Expire => next.status = OrderStatus::Expired,
		Step::Exhaust => next.status = OrderStatus::Failed,
		Step::NotConfirmed => {
			next.attempts = next.attempts.saturating_add(1);
			if next.attempts >= policy.max_attempts {
				next.status = OrderStatus::Failed;
			}
		},
		Step::Confirmed { credential } => {
			next.attempts = next.attempts.saturating_add(1);
			next.status = OrderStatus::Fulfilled;
			next.credential = Some(credential);
		},
	}

	// Only monitored orders advance; staying in `monitoring` is allowed.
	let allowed = order.status == OrderStatus::Monitoring
		&& (next.status == order.status || is_valid_transition(order.status, next.status));
	if !allowed {
		return Err(OrderStateError::InvalidTransition {
			from: order.status,
			to: next.status,
		});
	}

	next.updated_at = now;
	Ok(next)
}

/// Checks if a state transition is valid.
fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
	use OrderStatus::*;
	matches!(
		(from, to),
		(Pending, Monitoring) | (Monitoring, Fulfilled) | (Monitoring, Failed) | (Monitoring, Expired)
	)
}

/// Manages order persistence and transitions.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	policy: MonitoringPolicy,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>, policy: MonitoringPolicy) -> Self {
		Self { storage, policy }
	}

	pub fn policy(&self) -> &MonitoringPolicy {
		&self.policy
	}

	/// Persists a new order and records it under its requester.
	pub async fn create(&self, order: &Order) -> Result<(), OrderStateError> {
		self.storage
			.insert(StorageKey::Orders.as_str(), &order.id, order)
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))?;
		self.index_for_requester(&order.requester, &order.id).await
	}

	/// Gets an order by ID.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
			.map_err(|e| OrderStateError::from_storage(order_id, e))
	}

	/// Gets an order together with the version needed to update it.
	pub async fn load(&self, order_id: &str) -> Result<Versioned<Order>, OrderStateError> {
		self.storage
			.retrieve_versioned(StorageKey::Orders.as_str(), order_id)
			.await
			.map_err(|e| OrderStateError::from_storage(order_id, e))
	}

	/// All orders currently in `monitoring`.
	///
	/// Reads the active-order index rather than every order. Entries left
	/// behind by finished or missing orders are dropped on the way.
	pub async fn monitoring_orders(&self) -> Result<Vec<Order>, OrderStateError> {
		let active = self
			.storage
			.retrieve_all::<String>(StorageKey::ActiveOrders.as_str())
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))?;

		let mut orders = Vec::with_capacity(active.len());
		for (id, _) in active {
			match self.get_order(&id).await {
				Ok(order) if order.status == OrderStatus::Monitoring => orders.push(order),
				// Indexed ahead of its status change.
				Ok(order) if order.status == OrderStatus::Pending => {},
				Ok(_) | Err(OrderStateError::OrderNotFound(_)) => self.untrack(&id).await,
				Err(e) => return Err(e),
			}
		}
		Ok(orders)
	}

	/// Scans every order once, restoring index entries for orders in
	/// `monitoring`, and returns all orders that are not yet terminal.
	pub async fn reindex(&self) -> Result<Vec<Order>, OrderStateError> {
		let orders = self
			.storage
			.retrieve_all::<Order>(StorageKey::Orders.as_str())
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))?;

		let mut open = Vec::new();
		for (_, order) in orders {
			if order.status.is_terminal() {
				continue;
			}
			if order.status == OrderStatus::Monitoring {
				self.track(&order.id).await?;
			}
			open.push(order);
		}
		Ok(open)
	}

	/// Orders created by `requester` (case-insensitive), oldest first.
	pub async fn orders_for_requester(
		&self,
		requester: &str,
	) -> Result<Vec<Order>, OrderStateError> {
		let ids: Vec<String> = match self
			.storage
			.retrieve(
				StorageKey::OrdersByRequester.as_str(),
				&normalize_identity(requester),
			)
			.await
		{
			Ok(ids) => ids,
			Err(StorageError::NotFound) => return Ok(Vec::new()),
			Err(e) => return Err(OrderStateError::Storage(e.to_string())),
		};

		let mut orders = Vec::with_capacity(ids.len());
		for id in ids {
			match self.get_order(&id).await {
				Ok(order) => orders.push(order),
				Err(OrderStateError::OrderNotFound(_)) => {
					tracing::warn!(order_id = %id, "Requester index points at a missing order");
				},
				Err(e) => return Err(e),
			}
		}
		Ok(orders)
	}

	/// Submits a pending order for monitoring, fixing its deadline.
	///
	/// Idempotent for orders already in `monitoring`; terminal orders are rejected.
	pub async fn start_monitoring(&self, order_id: &str, now: u64) -> Result<Order, OrderStateError> {
		loop {
			let snapshot = self.load(order_id).await?;
			let order = &snapshot.value;
			if order.status == OrderStatus::Monitoring {
				return Ok(snapshot.into_inner());
			}
			if !is_valid_transition(order.status, OrderStatus::Monitoring) {
				return Err(OrderStateError::InvalidTransition {
					from: order.status,
					to: OrderStatus::Monitoring,
				});
			}

			// Indexed before the status change, so no monitored order is
			// ever missing from the index.
			self.track(order_id).await?;

			let mut next = order.clone();
			next.status = OrderStatus::Monitoring;
			next.monitoring_deadline = Some(now.saturating_add(self.policy.max_duration.as_secs()));
			next.updated_at = now;

			match self
				.storage
				.replace(StorageKey::Orders.as_str(), order_id, &snapshot, &next)
				.await
			{
				Ok(()) => return Ok(next),
				// Someone else moved it; re-read and decide again.
				Err(StorageError::Conflict(_)) => continue,
				Err(e) => return Err(OrderStateError::Storage(e.to_string())),
			}
		}
	}

	/// Applies `step` to the snapshot and writes the result if the stored
	/// order is still that snapshot.
	pub async fn commit(
		&self,
		snapshot: &Versioned<Order>,
		step: Step,
		now: u64,
	) -> Result<Order, OrderStateError> {
		let next = advance(&snapshot.value, step, &self.policy, now)?;
		self.storage
			.replace(StorageKey::Orders.as_str(), &next.id, snapshot, &next)
			.await
			.map_err(|e| OrderStateError::from_storage(&next.id, e))?;
		if next.status.is_terminal() {
			self.untrack(&next.id).await;
		}
		Ok(next)
	}

	async fn track(&self, order_id: &str) -> Result<(), OrderStateError> {
		self.storage
			.store(StorageKey::ActiveOrders.as_str(), order_id, &order_id)
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))
	}

	/// Best effort: a leftover entry is dropped by the next listing.
	async fn untrack(&self, order_id: &str) {
		if let Err(e) = self
			.storage
			.remove(StorageKey::ActiveOrders.as_str(), order_id)
			.await
		{
			tracing::warn!(order_id = %order_id, error = %e, "Failed to drop order from active index");
		}
	}

	/// Appends an order id to its requester's index.
	async fn index_for_requester(
		&self,
		requester: &str,
		order_id: &str,
	) -> Result<(), OrderStateError> {
		let namespace = StorageKey::OrdersByRequester.as_str();
		let key = normalize_identity(requester);
		loop {
			let result = match self
				.storage
				.retrieve_versioned::<Vec<String>>(namespace, &key)
				.await
			{
				Ok(current) => {
					let mut ids = current.value.clone();
					ids.push(order_id.to_string());
					self.storage.replace(namespace, &key, &current, &ids).await
				},
				Err(StorageError::NotFound) => {
					self.storage
						.insert(namespace, &key, &vec![order_id.to_string()])
						.await
				},
				Err(e) => Err(e),
			};

			match result {
				Ok(()) => return Ok(()),
				Err(StorageError::Conflict(_)) | Err(StorageError::AlreadyExists(_)) => continue,
				Err(e) => return Err(OrderStateError::Storage(e.to_string())),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use fulfill_storage::implementations::memory::MemoryStorage;
	use std::time::Duration;

	fn policy() -> MonitoringPolicy {
		MonitoringPolicy {
			poll_interval: Duration::from_secs(30),
			max_duration: Duration::from_secs(3600),
			max_attempts: 3,
			..MonitoringPolicy::default()
		}
	}

	fn monitoring_order(attempts: u32, deadline: u64) -> Order {
		let mut order = Order::new("o-1".into(), "alice".into(), 42, 100);
		order.status = OrderStatus::Monitoring;
		order.monitoring_deadline = Some(deadline);
		order.attempts = attempts;
		order
	}

	fn state_machine() -> OrderStateMachine {
		OrderStateMachine::new(
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			policy(),
		)
	}

	#[test]
	fn test_check_precedence() {
		let policy = policy();
		assert_eq!(check(&monitoring_order(0, 1_000), &policy, 1_000), Check::Verify);
		assert_eq!(check(&monitoring_order(3, 1_000), &policy, 1_000), Check::Exhaust);
		// Both conditions hold: expiry wins
		assert_eq!(check(&monitoring_order(3, 1_000), &policy, 1_001), Check::Expire);
		assert_eq!(check(&monitoring_order(0, 1_000), &policy, 1_001), Check::Expire);
	}

	#[test]
	fn test_not_confirmed_counts_attempt() {
		let order = monitoring_order(0, 1_000);
		let next = advance(&order, Step::NotConfirmed, &policy(), 500).unwrap();
		assert_eq!(next.status, OrderStatus::Monitoring);
		assert_eq!(next.attempts, 1);
		assert_eq!(next.updated_at, 500);
	}

	#[test]
	fn test_last_attempt_fails_same_step() {
		let order = monitoring_order(2, 1_000);
		let next = advance(&order, Step::NotConfirmed, &policy(), 500).unwrap();
		assert_eq!(next.status, OrderStatus::Failed);
		assert_eq!(next.attempts, 3);
		assert!(next.credential.is_none());
	}

	#[test]
	fn test_confirmed_binds_credential() {
		let order = monitoring_order(2, 1_000);
		let next = advance(
			&order,
			Step::Confirmed {
				credential: "ABCD-EFGH-JKMN-PQRS".into(),
			},
			&policy(),
			500,
		)
		.unwrap();
		assert_eq!(next.status, OrderStatus::Fulfilled);
		assert_eq!(next.attempts, 3);
		assert_eq!(next.credential.as_deref(), Some("ABCD-EFGH-JKMN-PQRS"));
	}

	#[test]
	fn test_terminal_states_are_absorbing() {
		for status in [
			OrderStatus::Fulfilled,
			OrderStatus::Failed,
			OrderStatus::Expired,
		] {
			let mut order = monitoring_order(0, 1_000);
			order.status = status;
			for step in [Step::Expire, Step::Exhaust, Step::NotConfirmed] {
				assert!(matches!(
					advance(&order, step, &policy(), 500),
					Err(OrderStateError::InvalidTransition { .. })
				));
			}
		}

		let pending = Order::new("o-2".into(), "bob".into(), 1, 0);
		assert!(advance(&pending, Step::NotConfirmed, &policy(), 1).is_err());
	}

	#[tokio::test]
	async fn test_start_monitoring_sets_deadline_once() {
		let machine = state_machine();
		let order = Order::new("o-1".into(), "Alice".into(), 42, 100);
		machine.create(&order).await.unwrap();

		let started = machine.start_monitoring("o-1", 200).await.unwrap();
		assert_eq!(started.status, OrderStatus::Monitoring);
		assert_eq!(started.monitoring_deadline, Some(200 + 3600));

		// A second call does not extend the deadline
		let again = machine.start_monitoring("o-1", 900).await.unwrap();
		assert_eq!(again.monitoring_deadline, Some(200 + 3600));

		assert!(matches!(
			machine.start_monitoring("missing", 200).await,
			Err(OrderStateError::OrderNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_commit_rejects_stale_snapshot() {
		let machine = state_machine();
		let order = Order::new("o-1".into(), "alice".into(), 42, 100);
		machine.create(&order).await.unwrap();
		machine.start_monitoring("o-1", 100).await.unwrap();

		let first = machine.load("o-1").await.unwrap();
		let second = machine.load("o-1").await.unwrap();

		machine.commit(&first, Step::NotConfirmed, 130).await.unwrap();
		let result = machine.commit(&second, Step::NotConfirmed, 130).await;
		assert!(matches!(result, Err(OrderStateError::Conflict(_))));

		assert_eq!(machine.get_order("o-1").await.unwrap().attempts, 1);
	}

	#[tokio::test]
	async fn test_requester_index_is_case_insensitive_and_ordered() {
		let machine = state_machine();
		for (id, who) in [("a", "Alice"), ("b", "bob"), ("c", "ALICE")] {
			machine
				.create(&Order::new(id.into(), who.into(), 1, 0))
				.await
				.unwrap();
		}

		let ids: Vec<_> = machine
			.orders_for_requester("alice")
			.await
			.unwrap()
			.into_iter()
			.map(|o| o.id)
			.collect();
		assert_eq!(ids, vec!["a", "c"]);
		assert!(machine
			.orders_for_requester("carol")
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_monitoring_orders_filters_status() {
		let machine = state_machine();
		machine
			.create(&Order::new("a".into(), "alice".into(), 1, 0))
			.await
			.unwrap();
		machine
			.create(&Order::new("b".into(), "alice".into(), 2, 0))
			.await
			.unwrap();
		machine.start_monitoring("b", 0).await.unwrap();

		let monitoring = machine.monitoring_orders().await.unwrap();
		assert_eq!(monitoring.len(), 1);
		assert_eq!(monitoring[0].id, "b");
	}

	#[tokio::test]
	async fn test_active_index_tracks_monitoring_orders() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let machine = OrderStateMachine::new(storage.clone(), policy());
		let active = StorageKey::ActiveOrders.as_str();
		for id in ["a", "b"] {
			machine
				.create(&Order::new(id.into(), "alice".into(), 1, 0))
				.await
				.unwrap();
		}
		assert!(!storage.exists(active, "a").await.unwrap());

		machine.start_monitoring("a", 0).await.unwrap();
		machine.start_monitoring("b", 0).await.unwrap();
		assert!(storage.exists(active, "a").await.unwrap());

		// A terminal commit takes the order out of the index.
		let snapshot = machine.load("a").await.unwrap();
		machine.commit(&snapshot, Step::Expire, 10).await.unwrap();
		assert!(!storage.exists(active, "a").await.unwrap());

		// A non-terminal commit keeps it.
		let snapshot = machine.load("b").await.unwrap();
		machine.commit(&snapshot, Step::NotConfirmed, 10).await.unwrap();
		assert!(storage.exists(active, "b").await.unwrap());

		// Orders outside the index are never listed.
		let mut stray = Order::new("c".into(), "alice".into(), 1, 0);
		stray.status = OrderStatus::Monitoring;
		storage
			.store(StorageKey::Orders.as_str(), "c", &stray)
			.await
			.unwrap();
		let ids: Vec<_> = machine
			.monitoring_orders()
			.await
			.unwrap()
			.into_iter()
			.map(|o| o.id)
			.collect();
		assert_eq!(ids, vec!["b"]);
	}

	#[tokio::test]
	async fn test_stale_index_entries_are_dropped() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let machine = OrderStateMachine::new(storage.clone(), policy());
		let active = StorageKey::ActiveOrders.as_str();

		let mut done = Order::new("done".into(), "alice".into(), 1, 0);
		done.status = OrderStatus::Failed;
		storage
			.store(StorageKey::Orders.as_str(), "done", &done)
			.await
			.unwrap();
		machine
			.create(&Order::new("queued".into(), "alice".into(), 1, 0))
			.await
			.unwrap();
		for id in ["done", "gone", "queued"] {
			storage.store(active, id, &id).await.unwrap();
		}

		assert!(machine.monitoring_orders().await.unwrap().is_empty());
		assert!(!storage.exists(active, "done").await.unwrap());
		assert!(!storage.exists(active, "gone").await.unwrap());
		// A pending order may be mid-start; its entry stays.
		assert!(storage.exists(active, "queued").await.unwrap());
	}

	#[tokio::test]
	async fn test_reindex_restores_entries_and_returns_open_orders() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let machine = OrderStateMachine::new(storage.clone(), policy());

		for (id, status) in [
			("p", OrderStatus::Pending),
			("m", OrderStatus::Monitoring),
			("f", OrderStatus::Fulfilled),
		] {
			let mut order = Order::new(id.into(), "alice".into(), 1, 0);
			order.status = status;
			storage
				.store(StorageKey::Orders.as_str(), id, &order)
				.await
				.unwrap();
		}
		assert!(machine.monitoring_orders().await.unwrap().is_empty());

		let mut open: Vec<_> = machine
			.reindex()
			.await
			.unwrap()
			.into_iter()
			.map(|o| o.id)
			.collect();
		open.sort();
		assert_eq!(open, vec!["m", "p"]);

		let monitoring = machine.monitoring_orders().await.unwrap();
		assert_eq!(monitoring.len(), 1);
		assert_eq!(monitoring[0].id, "m");
	}
}
