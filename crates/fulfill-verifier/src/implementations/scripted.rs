//! Scripted verifier for tests and demos.
//!
//! Answers come from a per-(requester, item) queue of scripted outcomes.
//! Once a queue is exhausted, or for pairs with no script at all, the
//! configured default answer is returned.

use crate::{VerifierError, VerifierFactory, VerifierInterface, VerifierRegistry};
use async_trait::async_trait;
use fulfill_types::{
	normalize_identity, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	ValidationError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A single scripted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
	Confirmed,
	NotConfirmed,
	/// Fails with a transport error carrying this message.
	Error(String),
}

impl From<bool> for Step {
	fn from(confirmed: bool) -> Self {
		if confirmed {
			Step::Confirmed
		} else {
			Step::NotConfirmed
		}
	}
}

fn script_key(requester: &str, item_id: u64) -> String {
	format!("{}:{}", normalize_identity(requester), item_id)
}

/// Deterministic verifier driven by scripted outcomes.
pub struct ScriptedVerifier {
	scripts: Mutex<HashMap<String, VecDeque<Step>>>,
	default: bool,
	calls: AtomicUsize,
}

impl ScriptedVerifier {
	/// Creates a verifier that answers `default` for every unscripted query.
	pub fn new(default: bool) -> Self {
		Self {
			scripts: Mutex::new(HashMap::new()),
			default,
			calls: AtomicUsize::new(0),
		}
	}

	/// Appends outcomes for one requester and item, consumed in order.
	pub fn script(
		self,
		requester: &str,
		item_id: u64,
		steps: impl IntoIterator<Item = Step>,
	) -> Self {
		if let Ok(mut scripts) = self.scripts.lock() {
			scripts
				.entry(script_key(requester, item_id))
				.or_default()
				.extend(steps);
		}
		self
	}

	/// Number of `verify` calls served so far.
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn next_step(&self, requester: &str, item_id: u64) -> Result<Step, VerifierError> {
		let mut scripts = self
			.scripts
			.lock()
			.map_err(|_| VerifierError::Transport("script state poisoned".into()))?;
		Ok(scripts
			.get_mut(&script_key(requester, item_id))
			.and_then(VecDeque::pop_front)
			.unwrap_or_else(|| Step::from(self.default)))
	}
}

#[async_trait]
impl VerifierInterface for ScriptedVerifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(ScriptedVerifierSchema)
	}

	async fn verify(&self, requester: &str, item_id: u64) -> Result<bool, VerifierError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		match self.next_step(requester, item_id)? {
			Step::Confirmed => Ok(true),
			Step::NotConfirmed => Ok(false),
			Step::Error(message) => Err(VerifierError::Transport(message)),
		}
	}
}

/// Configuration schema for ScriptedVerifier.
pub struct ScriptedVerifierSchema;

impl ConfigSchema for ScriptedVerifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("default", FieldType::Boolean),
				Field::new(
					"sequences",
					FieldType::Map(Box::new(FieldType::Array(Box::new(FieldType::Boolean)))),
				),
			],
		);
		schema.validate(config)?;

		if let Some(sequences) = config.get("sequences").and_then(|v| v.as_table()) {
			for key in sequences.keys() {
				let valid = key
					.rsplit_once(':')
					.is_some_and(|(who, item)| !who.is_empty() && item.parse::<u64>().is_ok());
				if !valid {
					return Err(ValidationError::InvalidValue {
						field: format!("sequences.{}", key),
						message: "keys must have the form \"<requester>:<item_id>\"".into(),
					});
				}
			}
		}
		Ok(())
	}
}

/// Factory function to create a scripted verifier from configuration.
///
/// Configuration parameters:
/// - `default`: Answer once a script runs out (default: false)
/// - `sequences`: Table of `"<requester>:<item_id>" = [bool, ...]`
pub fn create_verifier(config: &toml::Value) -> Result<Box<dyn VerifierInterface>, VerifierError> {
	ScriptedVerifierSchema
		.validate(config)
		.map_err(|e| VerifierError::Configuration(e.to_string()))?;

	let default = config
		.get("default")
		.and_then(|v| v.as_bool())
		.unwrap_or(false);
	let mut verifier = ScriptedVerifier::new(default);

	if let Some(sequences) = config.get("sequences").and_then(|v| v.as_table()) {
		for (key, steps) in sequences {
			let Some((requester, item)) = key.rsplit_once(':') else {
				continue;
			};
			let item_id = item
				.parse::<u64>()
				.map_err(|e| VerifierError::Configuration(e.to_string()))?;
			let steps = steps
				.as_array()
				.map(|steps| {
					steps
						.iter()
						.filter_map(|v| v.as_bool())
						.map(Step::from)
						.collect::<Vec<_>>()
				})
				.unwrap_or_default();
			verifier = verifier.script(requester, item_id, steps);
		}
	}

	Ok(Box::new(verifier))
}

/// Registry for the scripted verifier implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "scripted";
	type Factory = VerifierFactory;

	fn factory() -> Self::Factory {
		create_verifier
	}
}

impl VerifierRegistry for Registry {}
