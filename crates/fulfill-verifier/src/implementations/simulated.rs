//! Simulated marketplace verifier.
//!
//! Confirms each query with a fixed probability after an optional delay.
//! Intended for local runs without a real marketplace behind the engine.

use crate::{VerifierError, VerifierFactory, VerifierInterface, VerifierRegistry};
use async_trait::async_trait;
use fulfill_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use rand::Rng;
use std::time::Duration;

/// Verifier returning random answers.
pub struct SimulatedVerifier {
	confirm_probability: f64,
	latency: Duration,
}

impl SimulatedVerifier {
	pub fn new(confirm_probability: f64, latency: Duration) -> Self {
		Self {
			confirm_probability: confirm_probability.clamp(0.0, 1.0),
			latency,
		}
	}
}

#[async_trait]
impl VerifierInterface for SimulatedVerifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SimulatedVerifierSchema)
	}

	async fn verify(&self, requester: &str, item_id: u64) -> Result<bool, VerifierError> {
		// ThreadRng is not Send, so draw before the await point.
		let confirmed = rand::thread_rng().gen_bool(self.confirm_probability);
		if !self.latency.is_zero() {
			tokio::time::sleep(self.latency).await;
		}
		tracing::debug!(requester, item_id, confirmed, "Simulated verification");
		Ok(confirmed)
	}
}

/// Configuration schema for SimulatedVerifier.
pub struct SimulatedVerifierSchema;

impl ConfigSchema for SimulatedVerifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new(
					"confirm_probability",
					FieldType::Float {
						min: Some(0.0),
						max: Some(1.0),
					},
				),
				Field::new(
					"latency_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(60_000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a simulated verifier from configuration.
///
/// Configuration parameters:
/// - `confirm_probability`: Chance in [0, 1] that a query confirms (default: 0.5)
/// - `latency_ms`: Artificial delay per query (default: 0)
pub fn create_verifier(config: &toml::Value) -> Result<Box<dyn VerifierInterface>, VerifierError> {
	SimulatedVerifierSchema
		.validate(config)
		.map_err(|e| VerifierError::Configuration(e.to_string()))?;

	let confirm_probability = config
		.get("confirm_probability")
		.and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
		.unwrap_or(0.5);
	let latency_ms = config
		.get("latency_ms")
		.and_then(|v| v.as_integer())
		.unwrap_or(0) as u64;

	Ok(Box::new(SimulatedVerifier::new(
		confirm_probability,
		Duration::from_millis(latency_ms),
	)))
}

/// Registry for the simulated verifier implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "simulated";
	type Factory = VerifierFactory;

	fn factory() -> Self::Factory {
		create_verifier
	}
}

impl VerifierRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_extreme_probabilities() {
		let always = SimulatedVerifier::new(1.0, Duration::ZERO);
		let never = SimulatedVerifier::new(0.0, Duration::ZERO);
		for _ in 0..20 {
			assert!(always.verify("alice", 1).await.unwrap());
			assert!(!never.verify("alice", 1).await.unwrap());
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_latency_is_applied() {
		let verifier = SimulatedVerifier::new(1.0, Duration::from_millis(250));
		let started = tokio::time::Instant::now();
		verifier.verify("alice", 1).await.unwrap();
		assert!(started.elapsed() >= Duration::from_millis(250));
	}

	#[test]
	fn test_schema_bounds() {
		let config: toml::Value = toml::from_str("confirm_probability = 1.5").unwrap();
		assert!(create_verifier(&config).is_err());

		let config: toml::Value = toml::from_str("confirm_probability = 1").unwrap();
		assert!(create_verifier(&config).is_ok());

		assert!(create_verifier(&toml::Value::Table(Default::default())).is_ok());
	}
}
