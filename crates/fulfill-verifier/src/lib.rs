//! Purchase verification module for the fulfillment system.
//!
//! The verifier answers one question for the monitoring loop: has requester
//! X acquired item Y on the external marketplace? Its internals are opaque to
//! the engine; only the contract in [`VerifierInterface`] matters. Failures
//! are transient by definition and the engine treats them as "not yet
//! confirmed".

use async_trait::async_trait;
use fulfill_types::{ConfigSchema, ImplementationRegistry};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod scripted;
	pub mod simulated;
}

/// Errors that can occur while verifying a purchase.
#[derive(Debug, Error)]
pub enum VerifierError {
	/// Error that occurs while talking to the external source.
	#[error("Transport error: {0}")]
	Transport(String),
	/// Error that occurs when a verification exceeds its time budget.
	#[error("Verification timed out after {0:?}")]
	Timeout(Duration),
	/// Error that occurs when the external source answers with something unusable.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	/// Error that occurs when the implementation is misconfigured.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for purchase verifiers.
#[async_trait]
pub trait VerifierInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Returns `Ok(true)` once `requester` owns `item_id`, `Ok(false)` if not yet.
	async fn verify(&self, requester: &str, item_id: u64) -> Result<bool, VerifierError>;
}

/// Type alias for verifier factory functions.
pub type VerifierFactory = fn(&toml::Value) -> Result<Box<dyn VerifierInterface>, VerifierError>;

/// Registry trait for verifier implementations.
pub trait VerifierRegistry: ImplementationRegistry<Factory = VerifierFactory> {}

/// Get all registered verifier implementations.
pub fn get_all_implementations() -> Vec<(&'static str, VerifierFactory)> {
	use implementations::{http, scripted, simulated};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(scripted::Registry::NAME, scripted::Registry::factory()),
		(simulated::Registry::NAME, simulated::Registry::factory()),
	]
}

/// Service wrapping the configured verifier with a per-call time budget.
pub struct VerifierService {
	implementation: Box<dyn VerifierInterface>,
	timeout: Duration,
}

impl VerifierService {
	pub fn new(implementation: Box<dyn VerifierInterface>, timeout: Duration) -> Self {
		Self {
			implementation,
			timeout,
		}
	}

	/// Verifies a purchase, failing with `Timeout` if the call overruns.
	///
	/// A timed-out call is dropped, which cancels it.
	pub async fn verify(&self, requester: &str, item_id: u64) -> Result<bool, VerifierError> {
		match tokio::time::timeout(self.timeout, self.implementation.verify(requester, item_id))
			.await
		{
			Ok(result) => result,
			Err(_) => Err(VerifierError::Timeout(self.timeout)),
		}
	}
}
