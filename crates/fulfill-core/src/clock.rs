//! Time source for the engine.
//!
//! Deadlines and timestamps are read through [`Clock`] so tests can move time
//! forward without sleeping.

use fulfill_types::current_timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync {
	fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> u64 {
		current_timestamp()
	}
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicU64,
}

impl ManualClock {
	pub fn new(start: u64) -> Self {
		Self {
			now: AtomicU64::new(start),
		}
	}

	pub fn set(&self, now: u64) {
		self.now.store(now, Ordering::SeqCst);
	}

	pub fn advance(&self, by: Duration) {
		self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> u64 {
		self.now.load(Ordering::SeqCst)
	}
}
