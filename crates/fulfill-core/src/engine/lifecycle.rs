//! Lifecycle management for the fulfillment engine.
//!
//! Handles startup recovery and shutdown of the monitoring scheduler.

use super::{EngineError, FulfillmentEngine};
use fulfill_types::{truncate_id, OrderStatus};

impl FulfillmentEngine {
	/// Resumes monitoring after a restart.
	///
	/// Rebuilds the active-order index, puts orders whose submission stopped
	/// short of `monitoring` under watch, and starts the scheduler if any
	/// order is being monitored. Returns how many are.
	pub async fn initialize(&self) -> Result<usize, EngineError> {
		tracing::info!("Initializing fulfillment engine");

		let open = self.state_machine.reindex().await?;
		let mut resumed = 0;
		for order in open {
			if order.status == OrderStatus::Pending {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					"Order was never submitted for monitoring, submitting now"
				);
				self.scheduler.watch(&order.id).await?;
			}
			resumed += 1;
		}

		if resumed == 0 {
			tracing::info!("No orders awaiting verification");
			return Ok(0);
		}

		tracing::info!(orders = resumed, "Resuming monitoring");
		self.scheduler.start();
		Ok(resumed)
	}

	/// Stops scheduling new cycles. A cycle in progress runs to completion.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down fulfillment engine");
		self.scheduler.stop();
		Ok(())
	}
}
