//! HTTP purchase verifier.
//!
//! Asks an external verification endpoint whether a requester owns an item:
//!
//! ```text
//! GET {base_url}/verify?identity={requester}&item_id={item_id}
//! -> 200 {"confirmed": true|false}
//! ```
//!
//! Any non-success status, transport failure or malformed body is reported
//! as an error so the engine retries on its next cycle.

use crate::{VerifierError, VerifierFactory, VerifierInterface, VerifierRegistry};
use async_trait::async_trait;
use fulfill_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use serde::Deserialize;
use std::time::Duration;

/// Body returned by the verification endpoint.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
	confirmed: bool,
}

/// HTTP verifier implementation.
pub struct HttpVerifier {
	client: reqwest::Client,
	base_url: String,
	api_key: Option<String>,
}

impl HttpVerifier {
	pub fn new(
		base_url: impl Into<String>,
		request_timeout: Duration,
		api_key: Option<String>,
	) -> Result<Self, VerifierError> {
		let client = reqwest::Client::builder()
			.pool_idle_timeout(Duration::from_secs(90))
			.pool_max_idle_per_host(10)
			.timeout(request_timeout)
			.build()
			.map_err(|e| VerifierError::Configuration(e.to_string()))?;

		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			api_key,
		})
	}
}

#[async_trait]
impl VerifierInterface for HttpVerifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpVerifierSchema)
	}

	async fn verify(&self, requester: &str, item_id: u64) -> Result<bool, VerifierError> {
		let url = format!("{}/verify", self.base_url);
		let item = item_id.to_string();
		let mut request = self
			.client
			.get(&url)
			.query(&[("identity", requester), ("item_id", item.as_str())]);
		if let Some(api_key) = &self.api_key {
			request = request.bearer_auth(api_key);
		}

		let response = request
			.send()
			.await
			.map_err(|e| VerifierError::Transport(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(VerifierError::Transport(format!(
				"verification endpoint returned {}",
				status
			)));
		}

		let body: VerifyResponse = response
			.json()
			.await
			.map_err(|e| VerifierError::InvalidResponse(e.to_string()))?;
		Ok(body.confirmed)
	}
}

/// Configuration schema for HttpVerifier.
pub struct HttpVerifierSchema;

impl ConfigSchema for HttpVerifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
						Ok(())
					},
					_ => Err("base_url must start with http:// or https://".into()),
				}
			})],
			vec![
				Field::new(
					"request_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
				Field::new("api_key", FieldType::String),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an HTTP verifier from configuration.
///
/// Configuration parameters:
/// - `base_url`: Verification endpoint root (required)
/// - `request_timeout_seconds`: Per-request timeout (default: 10)
/// - `api_key`: Optional bearer token
pub fn create_verifier(config: &toml::Value) -> Result<Box<dyn VerifierInterface>, VerifierError> {
	HttpVerifierSchema
		.validate(config)
		.map_err(|e| VerifierError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| VerifierError::Configuration("base_url is required".into()))?;
	let timeout = config
		.get("request_timeout_seconds")
		.and_then(|v| v.as_integer())
		.unwrap_or(10) as u64;
	let api_key = config
		.get("api_key")
		.and_then(|v| v.as_str())
		.map(str::to_string);

	Ok(Box::new(HttpVerifier::new(
		base_url,
		Duration::from_secs(timeout),
		api_key,
	)?))
}

/// Registry for the HTTP verifier implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = VerifierFactory;

	fn factory() -> Self::Factory {
		create_verifier
	}
}

impl VerifierRegistry for Registry {}
