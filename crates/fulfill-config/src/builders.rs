//! Configuration builder for tests and development setups.

use crate::{ApiConfig, Config, MonitorConfig, StorageConfig, VerifierConfig};
use std::collections::HashMap;

/// Builder for `Config` instances backed by memory storage and a scripted
/// verifier.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	monitor: MonitorConfig,
	storage_primary: String,
	storage: toml::Value,
	verifier_primary: String,
	verifier: toml::Value,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			monitor: MonitorConfig::default(),
			storage_primary: "memory".to_string(),
			storage: toml::Value::Table(Default::default()),
			verifier_primary: "scripted".to_string(),
			verifier: toml::Value::Table(Default::default()),
			api: None,
		}
	}

	pub fn poll_interval_seconds(mut self, seconds: u64) -> Self {
		self.monitor.poll_interval_seconds = seconds;
		self
	}

	pub fn max_monitoring_hours(mut self, hours: u64) -> Self {
		self.monitor.max_monitoring_hours = hours;
		self
	}

	pub fn max_attempts(mut self, attempts: u32) -> Self {
		self.monitor.max_attempts = attempts;
		self
	}

	pub fn max_concurrency(mut self, concurrency: usize) -> Self {
		self.monitor.max_concurrency = concurrency;
		self
	}

	/// Selects the storage implementation and its table.
	pub fn storage(mut self, primary: impl Into<String>, config: toml::Value) -> Self {
		self.storage_primary = primary.into();
		self.storage = config;
		self
	}

	/// Selects the verifier implementation and its table.
	pub fn verifier(mut self, primary: impl Into<String>, config: toml::Value) -> Self {
		self.verifier_primary = primary.into();
		self.verifier = config;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			monitor: self.monitor,
			storage: StorageConfig {
				implementations: HashMap::from([(self.storage_primary.clone(), self.storage)]),
				primary: self.storage_primary,
			},
			verifier: VerifierConfig {
				implementations: HashMap::from([(
					self.verifier_primary.clone(),
					self.verifier,
				)]),
				primary: self.verifier_primary,
			},
			api: self.api,
		}
	}
}
