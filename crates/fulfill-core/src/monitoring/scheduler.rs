//! Monitoring scheduler for orders awaiting purchase confirmation.
//!
//! A background timer runs one cycle per poll interval. Each cycle loads the
//! orders in `monitoring`, checks them concurrently against the verifier and
//! commits each transition independently. Cycles never overlap: a cycle
//! holds the cycle lock until all of its writes have completed, and an order
//! still being processed is skipped rather than checked twice.

use crate::clock::Clock;
use crate::credential::{CredentialError, CredentialIssuer};
use crate::engine::event_bus::EventBus;
use crate::state::{advance, check, Check, OrderStateError, OrderStateMachine, Step};
use dashmap::DashSet;
use fulfill_types::{
	truncate_id, FulfillmentEvent, MonitorEvent, Order, OrderEvent, OrderStatus,
};
use fulfill_verifier::VerifierService;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::instrument;

/// Summary of one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
	/// Orders in `monitoring` when the cycle started.
	pub examined: usize,
	/// Orders left alone because an earlier cycle still held them.
	pub skipped_in_flight: usize,
	pub fulfilled: usize,
	pub failed: usize,
	pub expired: usize,
	pub still_monitoring: usize,
	/// Verifier calls that errored and were counted as not confirmed.
	pub verification_errors: usize,
	/// Transitions aborted by a persistence failure; retried next cycle.
	pub storage_errors: usize,
	/// Order checks whose task panicked; retried next cycle.
	pub panicked: usize,
}

impl CycleReport {
	/// Orders that reached a terminal state this cycle.
	pub fn transitioned(&self) -> usize {
		self.fulfilled + self.failed + self.expired
	}

	fn record(&mut self, outcome: &OrderOutcome) {
		match outcome.status {
			Some(OrderStatus::Fulfilled) => self.fulfilled += 1,
			Some(OrderStatus::Failed) => self.failed += 1,
			Some(OrderStatus::Expired) => self.expired += 1,
			Some(OrderStatus::Monitoring) => self.still_monitoring += 1,
			_ => {},
		}
		if outcome.verification_failed {
			self.verification_errors += 1;
		}
		if outcome.storage_failed {
			self.storage_errors += 1;
		}
	}
}

/// What happened to one order within a cycle.
#[derive(Debug, Default)]
struct OrderOutcome {
	/// Status after the cycle, `None` if nothing was written.
	status: Option<OrderStatus>,
	verification_failed: bool,
	storage_failed: bool,
}

/// Removes an order from the in-flight set when its processing ends.
struct InFlight {
	set: Arc<DashSet<String>>,
	order_id: String,
}

impl Drop for InFlight {
	fn drop(&mut self) {
		self.set.remove(&self.order_id);
	}
}

/// Drives periodic verification of monitored orders.
pub struct MonitorScheduler {
	state_machine: Arc<OrderStateMachine>,
	issuer: Arc<CredentialIssuer>,
	verifier: Arc<VerifierService>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
	/// Held for the whole of a cycle.
	cycle_lock: tokio::sync::Mutex<()>,
	in_flight: Arc<DashSet<String>>,
	timer: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorScheduler {
	pub fn new(
		state_machine: Arc<OrderStateMachine>,
		issuer: Arc<CredentialIssuer>,
		verifier: Arc<VerifierService>,
		clock: Arc<dyn Clock>,
		event_bus: EventBus,
	) -> Self {
		Self {
			state_machine,
			issuer,
			verifier,
			clock,
			event_bus,
			cycle_lock: tokio::sync::Mutex::new(()),
			in_flight: Arc::new(DashSet::new()),
			timer: Mutex::new(None),
		}
	}

	/// Starts the poll timer. The first cycle runs right away.
	///
	/// Returns false if the timer was already running.
	pub fn start(self: &Arc<Self>) -> bool {
		let Ok(mut timer) = self.timer.lock() else {
			tracing::error!("Scheduler timer state poisoned");
			return false;
		};
		if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return false;
		}

		let interval = self.state_machine.policy().poll_interval;
		let scheduler = Arc::clone(self);
		*timer = Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				ticker.tick().await;
				// Run the cycle in its own task so stopping the timer never
				// cuts a cycle short.
				let cycle = Arc::clone(&scheduler);
				let handle = tokio::spawn(async move { cycle.run_cycle().await });
				match handle.await {
					Ok(Ok(report)) => tracing::debug!(
						examined = report.examined,
						transitioned = report.transitioned(),
						"Monitoring cycle complete"
					),
					Ok(Err(e)) => tracing::error!(error = %e, "Monitoring cycle failed"),
					Err(e) => tracing::error!(error = %e, "Monitoring cycle panicked"),
				}
			}
		}));

		tracing::info!(interval_secs = interval.as_secs(), "Monitoring scheduler started");
		true
	}

	/// Stops the poll timer. A cycle already running finishes on its own.
	///
	/// Returns false if the timer was not running.
	pub fn stop(&self) -> bool {
		let handle = match self.timer.lock() {
			Ok(mut timer) => timer.take(),
			Err(_) => {
				tracing::error!("Scheduler timer state poisoned");
				return false;
			},
		};
		match handle {
			Some(handle) => {
				handle.abort();
				tracing::info!("Monitoring scheduler stopped");
				true
			},
			None => false,
		}
	}

	pub fn is_running(&self) -> bool {
		self.timer
			.lock()
			.map(|timer| timer.as_ref().is_some_and(|handle| !handle.is_finished()))
			.unwrap_or(false)
	}

	/// Puts an order under monitoring and makes sure the timer is running.
	pub async fn watch(self: &Arc<Self>, order_id: &str) -> Result<Order, OrderStateError> {
		let before = self.state_machine.get_order(order_id).await?;
		let order = self
			.state_machine
			.start_monitoring(order_id, self.clock.now())
			.await?;

		if before.status == OrderStatus::Pending {
			if let Some(deadline) = order.monitoring_deadline {
				self.event_bus
					.publish(FulfillmentEvent::Order(OrderEvent::MonitoringStarted {
						order_id: order.id.clone(),
						deadline,
					}))
					.ok();
			}
		}

		self.start();
		Ok(order)
	}

	/// Runs one poll cycle over every order in `monitoring`.
	///
	/// Only a failure to list the monitored orders is returned; per-order
	/// failures are logged, published and counted in the report.
	pub async fn run_cycle(&self) -> Result<CycleReport, OrderStateError> {
		let _cycle = self.cycle_lock.lock().await;

		let orders = self.state_machine.monitoring_orders().await?;
		let mut report = CycleReport {
			examined: orders.len(),
			..CycleReport::default()
		};

		let policy = self.state_machine.policy();
		let semaphore = Arc::new(Semaphore::new(policy.max_concurrency.max(1)));
		let mut tasks = JoinSet::new();

		for order in orders {
			if !self.in_flight.insert(order.id.clone()) {
				tracing::debug!(order_id = %truncate_id(&order.id), "Order already in flight, skipping");
				report.skipped_in_flight += 1;
				continue;
			}
			let guard = InFlight {
				set: Arc::clone(&self.in_flight),
				order_id: order.id.clone(),
			};

			let permit = match Arc::clone(&semaphore).acquire_owned().await {
				Ok(permit) => permit,
				Err(e) => {
					tracing::error!("Failed to acquire semaphore permit: {}", e);
					break;
				},
			};

			let worker = self.worker();
			tasks.spawn(async move {
				let _permit = permit;
				let _guard = guard;
				worker.process(order.id).await
			});
		}

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok(outcome) => report.record(&outcome),
				Err(e) => {
					tracing::error!(error = %e, "Order check panicked");
					report.panicked += 1;
				},
			}
		}

		self.event_bus
			.publish(FulfillmentEvent::Monitor(MonitorEvent::CycleCompleted {
				examined: report.examined,
				transitioned: report.transitioned(),
			}))
			.ok();
		tracing::info!(
			examined = report.examined,
			fulfilled = report.fulfilled,
			failed = report.failed,
			expired = report.expired,
			still_monitoring = report.still_monitoring,
			panicked = report.panicked,
			"Cycle finished"
		);

		Ok(report)
	}

	fn worker(&self) -> OrderWorker {
		OrderWorker {
			state_machine: Arc::clone(&self.state_machine),
			issuer: Arc::clone(&self.issuer),
			verifier: Arc::clone(&self.verifier),
			clock: Arc::clone(&self.clock),
			event_bus: self.event_bus.clone(),
		}
	}
}

/// Owned handles for checking a single order inside a spawned task.
struct OrderWorker {
	state_machine: Arc<OrderStateMachine>,
	issuer: Arc<CredentialIssuer>,
	verifier: Arc<VerifierService>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
}

impl OrderWorker {
	#[instrument(skip_all, fields(order_id = %truncate_id(&order_id)))]
	async fn process(&self, order_id: String) -> OrderOutcome {
		let mut outcome = OrderOutcome::default();

		let snapshot = match self.state_machine.load(&order_id).await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				self.abort(&order_id, &e, &mut outcome);
				return outcome;
			},
		};
		// Re-read: an overlapping writer may have finished it already.
		if snapshot.value.status != OrderStatus::Monitoring {
			return outcome;
		}
		let order = &snapshot.value;

		let policy = self.state_machine.policy();
		let step = match check(order, policy, self.clock.now()) {
			Check::Expire => Step::Expire,
			Check::Exhaust => Step::Exhaust,
			Check::Verify => {
				let confirmed = match self.issuer.credential_for_order(&order_id).await {
					// An earlier cycle was confirmed but its commit did not land.
					Ok(Some(_)) => true,
					Ok(None) => self.query(order, &mut outcome).await,
					Err(e) => {
						self.credential_failed(&order_id, e, &mut outcome);
						return outcome;
					},
				};
				if confirmed {
					match self.bind_credential(&order_id).await {
						Ok(credential) => Step::Confirmed { credential },
						Err(e) => {
							self.credential_failed(&order_id, e, &mut outcome);
							return outcome;
						},
					}
				} else {
					Step::NotConfirmed
				}
			},
		};

		let now = self.clock.now();
		let unfulfilled = advance(order, step.clone(), policy, now)
			.is_ok_and(|next| matches!(next.status, OrderStatus::Failed | OrderStatus::Expired));
		if unfulfilled {
			// The order must not end with a redeemable credential behind it.
			if let Err(e) = self.issuer.void_for_order(&order_id).await {
				self.credential_failed(&order_id, e, &mut outcome);
				return outcome;
			}
		}

		match self.state_machine.commit(&snapshot, step, now).await {
			Ok(updated) => {
				self.announce(&updated);
				outcome.status = Some(updated.status);
			},
			Err(e) => self.abort(&order_id, &e, &mut outcome),
		}
		outcome
	}

	/// Asks the verifier once. Errors count as not confirmed.
	async fn query(&self, order: &Order, outcome: &mut OrderOutcome) -> bool {
		match self.verifier.verify(&order.requester, order.item_id).await {
			Ok(confirmed) => confirmed,
			Err(e) => {
				tracing::warn!(error = %e, "Verification failed, treating as not confirmed");
				self.event_bus
					.publish(FulfillmentEvent::Monitor(MonitorEvent::VerificationFailed {
						order_id: order.id.clone(),
						error: e.to_string(),
					}))
					.ok();
				outcome.verification_failed = true;
				false
			},
		}
	}

	fn credential_failed(&self, order_id: &str, err: CredentialError, outcome: &mut OrderOutcome) {
		tracing::error!(error = %err, "Credential store update failed");
		self.publish_aborted(order_id, err.to_string());
		outcome.storage_failed = true;
	}

	/// Issues the order's credential, or reuses the one a previous cycle issued.
	async fn bind_credential(&self, order_id: &str) -> Result<String, CredentialError> {
		match self.issuer.issue(order_id).await {
			Ok(credential) => Ok(credential.value),
			Err(CredentialError::AlreadyIssued(existing)) => {
				tracing::info!("Reusing credential issued in an earlier cycle");
				Ok(existing)
			},
			Err(e) => Err(e),
		}
	}

	fn announce(&self, order: &Order) {
		let event = match order.status {
			OrderStatus::Fulfilled => OrderEvent::Fulfilled {
				order_id: order.id.clone(),
				attempts: order.attempts,
			},
			OrderStatus::Failed => OrderEvent::Failed {
				order_id: order.id.clone(),
				attempts: order.attempts,
			},
			OrderStatus::Expired => OrderEvent::Expired {
				order_id: order.id.clone(),
				attempts: order.attempts,
			},
			_ => {
				tracing::debug!(attempts = order.attempts, "Not yet confirmed");
				return;
			},
		};
		tracing::info!(status = %order.status, attempts = order.attempts, "Order finished monitoring");
		self.event_bus.publish(FulfillmentEvent::Order(event)).ok();
	}

	fn abort(&self, order_id: &str, err: &OrderStateError, outcome: &mut OrderOutcome) {
		match err {
			// Another writer got there first; the next cycle re-reads it.
			OrderStateError::Conflict(_) => {
				tracing::debug!("Order changed during check, leaving it for the next cycle");
			},
			_ => {
				tracing::error!(error = %err, "Order transition aborted");
				self.publish_aborted(order_id, err.to_string());
				outcome.storage_failed = true;
			},
		}
	}

	fn publish_aborted(&self, order_id: &str, error: String) {
		self.event_bus
			.publish(FulfillmentEvent::Monitor(MonitorEvent::TransitionAborted {
				order_id: order_id.to_string(),
				error,
			}))
			.ok();
	}
}
