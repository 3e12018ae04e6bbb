//! Builder pattern for constructing fulfillment engines.
//!
//! Composes a [`FulfillmentEngine`] from configured storage and verifier
//! implementations using factory functions keyed by implementation name.

use crate::clock::{Clock, SystemClock};
use crate::engine::{event_bus::EventBus, FulfillmentEngine};
use fulfill_config::Config;
use fulfill_storage::{StorageError, StorageInterface, StorageService};
use fulfill_verifier::{VerifierError, VerifierInterface, VerifierService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for each pluggable component, keyed by name.
pub struct FulfillmentFactories<SF, VF> {
	pub storage_factories: HashMap<String, SF>,
	pub verifier_factories: HashMap<String, VF>,
}

/// Builder for constructing a FulfillmentEngine with pluggable implementations.
pub struct FulfillmentBuilder {
	config: Config,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
}

impl FulfillmentBuilder {
	/// Creates a new builder with the given configuration and the system clock.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: Arc::new(SystemClock),
			event_bus: EventBus::default(),
		}
	}

	/// Replaces the clock used for deadlines and timestamps.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	/// Replaces the event bus, e.g. to subscribe before the engine starts.
	pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
		self.event_bus = event_bus;
		self
	}

	/// Builds the engine from the primary storage and verifier implementations.
	pub async fn build<SF, VF>(
		self,
		factories: FulfillmentFactories<SF, VF>,
	) -> Result<FulfillmentEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		VF: Fn(&toml::Value) -> Result<Box<dyn VerifierInterface>, VerifierError>,
	{
		let storage_backend = load_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
		)?;
		let storage = Arc::new(StorageService::new(storage_backend));

		let verifier_backend = load_primary(
			"verifier",
			&self.config.verifier.primary,
			&self.config.verifier.implementations,
			&factories.verifier_factories,
		)?;

		let policy = self.config.monitor.policy();
		let verifier = Arc::new(VerifierService::new(
			verifier_backend,
			policy.verification_timeout,
		));

		tracing::info!(
			poll_interval_secs = policy.poll_interval.as_secs(),
			max_attempts = policy.max_attempts,
			max_concurrency = policy.max_concurrency,
			"Monitoring policy"
		);

		Ok(FulfillmentEngine::new(
			storage,
			verifier,
			policy,
			self.clock,
			self.event_bus,
		))
	}
}

/// Instantiates the primary implementation of one component.
///
/// Other configured implementations are skipped: only one backend of each
/// kind is active at a time.
fn load_primary<T: ?Sized, E: std::fmt::Display, F>(
	component: &'static str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	for name in implementations.keys() {
		if name != primary {
			tracing::info!(component, implementation = %name, enabled = false, "Loaded");
		}
	}

	let config = implementations.get(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' is not configured",
			component, primary
		))
	})?;
	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"No {} implementation named '{}'",
			component, primary
		))
	})?;

	match factory(config) {
		Ok(implementation) => {
			tracing::info!(component, implementation = %primary, enabled = true, "Loaded");
			Ok(implementation)
		},
		Err(e) => {
			tracing::error!(
				component,
				implementation = %primary,
				error = %e,
				"Failed to create implementation"
			);
			Err(BuilderError::Config(format!(
				"Failed to create {} implementation '{}': {}",
				component, primary, e
			)))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use fulfill_config::builders::ConfigBuilder;
	use fulfill_types::OrderStatus;

	use fulfill_storage::StorageFactory;
	use fulfill_verifier::VerifierFactory;

	fn factories() -> FulfillmentFactories<StorageFactory, VerifierFactory> {
		FulfillmentFactories {
			storage_factories: fulfill_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			verifier_factories: fulfill_verifier::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	#[tokio::test]
	async fn test_build_from_default_config() {
		let config = ConfigBuilder::new().build();
		let engine = FulfillmentBuilder::new(config)
			.with_clock(Arc::new(ManualClock::new(500)))
			.build(factories())
			.await
			.unwrap();

		let order = engine.create_order("alice", 1).await.unwrap();
		engine.shutdown().await.unwrap();
		assert_eq!(order.status, OrderStatus::Monitoring);
		assert_eq!(order.created_at, 500);
	}

	#[tokio::test]
	async fn test_unknown_primary_fails() {
		let mut verifier = toml::Table::new();
		verifier.insert("confirm_probability".into(), toml::Value::Float(0.5));
		let config = ConfigBuilder::new()
			.verifier("oracle", toml::Value::Table(verifier))
			.build();

		let result = FulfillmentBuilder::new(config).build(factories()).await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}

	#[tokio::test]
	async fn test_invalid_implementation_config_fails() {
		let mut verifier = toml::Table::new();
		verifier.insert("confirm_probability".into(), toml::Value::Float(3.0));
		let config = ConfigBuilder::new()
			.verifier("simulated", toml::Value::Table(verifier))
			.build();

		let result = FulfillmentBuilder::new(config).build(factories()).await;
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}
}
