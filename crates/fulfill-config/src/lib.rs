//! Configuration module for the fulfillment system.
//!
//! This module provides structures and utilities for managing engine configuration.
//! It supports loading configuration from TOML files and provides validation to ensure
//! all required configuration values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(any(test, feature = "testing"))]
pub mod builders;
mod loader;

use fulfill_types::MonitoringPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest poll interval accepted, in seconds.
const MAX_POLL_INTERVAL_SECONDS: u64 = 86_400;
/// Longest monitoring window accepted, in hours (one year).
const MAX_MONITORING_HOURS: u64 = 8_760;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the fulfillment engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Monitoring policy for orders awaiting verification.
	#[serde(default)]
	pub monitor: MonitorConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for the purchase verifier.
	pub verifier: VerifierConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Monitoring policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
	/// Seconds between monitoring cycles.
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
	/// How long an order may stay in monitoring before it expires.
	#[serde(default = "default_max_monitoring_hours")]
	pub max_monitoring_hours: u64,
	/// Verification attempts allowed per order.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Orders verified in parallel within one cycle.
	#[serde(default = "default_max_concurrency")]
	pub max_concurrency: usize,
	/// Time budget for a single verifier call.
	#[serde(default = "default_verification_timeout_seconds")]
	pub verification_timeout_seconds: u64,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			poll_interval_seconds: default_poll_interval_seconds(),
			max_monitoring_hours: default_max_monitoring_hours(),
			max_attempts: default_max_attempts(),
			max_concurrency: default_max_concurrency(),
			verification_timeout_seconds: default_verification_timeout_seconds(),
		}
	}
}

impl MonitorConfig {
	/// Converts the raw settings into the policy the engine runs with.
	pub fn policy(&self) -> MonitoringPolicy {
		MonitoringPolicy {
			poll_interval: Duration::from_secs(self.poll_interval_seconds),
			max_duration: Duration::from_secs(self.max_monitoring_hours.saturating_mul(3600)),
			max_attempts: self.max_attempts,
			max_concurrency: self.max_concurrency,
			verification_timeout: Duration::from_secs(self.verification_timeout_seconds),
		}
	}
}

fn default_poll_interval_seconds() -> u64 {
	30
}

fn default_max_monitoring_hours() -> u64 {
	24
}

fn default_max_attempts() -> u32 {
	20
}

fn default_max_concurrency() -> usize {
	16
}

fn default_verification_timeout_seconds() -> u64 {
	10
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the purchase verifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of verifier implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

/// Returns the default API host.
fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_api_port() -> u16 {
	3000
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let var_name = var_name.as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)))
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file with async environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	///
	/// - Monitoring limits are positive, the poll interval is at most a day
	///   and the monitoring window at most a year
	/// - Storage and verifier name a primary that is configured
	/// - An enabled API has a usable port
	fn validate(&self) -> Result<(), ConfigError> {
		let monitor = &self.monitor;
		if monitor.poll_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"monitor.poll_interval_seconds must be greater than 0".into(),
			));
		}
		if monitor.poll_interval_seconds > MAX_POLL_INTERVAL_SECONDS {
			return Err(ConfigError::Validation(format!(
				"monitor.poll_interval_seconds cannot exceed {} (24 hours)",
				MAX_POLL_INTERVAL_SECONDS
			)));
		}
		if monitor.max_monitoring_hours == 0 {
			return Err(ConfigError::Validation(
				"monitor.max_monitoring_hours must be greater than 0".into(),
			));
		}
		if monitor.max_monitoring_hours > MAX_MONITORING_HOURS {
			return Err(ConfigError::Validation(format!(
				"monitor.max_monitoring_hours cannot exceed {} (one year)",
				MAX_MONITORING_HOURS
			)));
		}
		if monitor.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"monitor.max_attempts must be at least 1".into(),
			));
		}
		if monitor.max_concurrency == 0 {
			return Err(ConfigError::Validation(
				"monitor.max_concurrency must be at least 1".into(),
			));
		}
		if monitor.verification_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"monitor.verification_timeout_seconds must be greater than 0".into(),
			));
		}

		// Validate storage config
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		// Validate verifier config
		if self.verifier.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one verifier implementation must be configured".into(),
			));
		}
		if !self
			.verifier
			.implementations
			.contains_key(&self.verifier.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary verifier '{}' not found in implementations",
				self.verifier.primary
			)));
		}

		if let Some(ref api) = self.api {
			if api.enabled && api.port == 0 {
				return Err(ConfigError::Validation(
					"api.port must be set when the API is enabled".into(),
				));
			}
		}

		Ok(())
	}
}

/// Implementation of FromStr trait for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is automatically
/// validated after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
