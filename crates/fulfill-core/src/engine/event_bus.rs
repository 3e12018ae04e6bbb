//! Broadcast channel for fulfillment events.
//!
//! Subscribers that fall behind lose the oldest events; publishing never
//! blocks the engine.

use fulfill_types::FulfillmentEvent;
use tokio::sync::broadcast;

/// Event bus shared by the facade and the monitoring scheduler.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<FulfillmentEvent>,
}

impl EventBus {
	/// Creates a bus retaining up to `capacity` undelivered events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<FulfillmentEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event, returning the number of subscribers reached.
	///
	/// Fails when nobody is subscribed, which callers ignore.
	pub fn publish(
		&self,
		event: FulfillmentEvent,
	) -> Result<usize, broadcast::error::SendError<FulfillmentEvent>> {
		self.sender.send(event)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
