//! Main entry point for the fulfillment service.
//!
//! Loads the configuration, assembles the engine from the configured storage
//! and verifier implementations, resumes monitoring of any orders left in
//! flight and optionally serves the HTTP API until interrupted.

use clap::Parser;
use fulfill_config::Config;
use fulfill_core::{FulfillmentBuilder, FulfillmentEngine, FulfillmentFactories};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

use fulfill_storage::implementations::file::create_storage as create_file_storage;
use fulfill_storage::implementations::memory::create_storage as create_memory_storage;
use fulfill_verifier::implementations::http::create_verifier as create_http_verifier;
use fulfill_verifier::implementations::scripted::create_verifier as create_scripted_verifier;
use fulfill_verifier::implementations::simulated::create_verifier as create_simulated_verifier;

/// Command-line arguments for the fulfillment service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started fulfillment service");

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config_path);

	let engine = Arc::new(build_engine(config.clone()).await?);
	let resumed = engine.initialize().await?;
	tracing::info!(resumed, "Engine ready");

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			let api_task = server::start_server(api_config, Arc::clone(&engine));
			tokio::select! {
				result = api_task => {
					tracing::info!("API server finished");
					result?;
				}
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Received interrupt");
				}
			}
		},
		None => {
			tracing::info!("API disabled, monitoring only");
			tokio::signal::ctrl_c().await?;
		},
	}

	engine.shutdown().await?;
	tracing::info!("Stopped fulfillment service");
	Ok(())
}

/// Creates a factory HashMap with the appropriate function pointer type.
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the engine with every available storage and verifier implementation.
async fn build_engine(config: Config) -> Result<FulfillmentEngine, Box<dyn std::error::Error>> {
	let builder = FulfillmentBuilder::new(config);

	let storage_factories = create_factory_map!(
		fulfill_storage::StorageInterface,
		fulfill_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let verifier_factories = create_factory_map!(
		fulfill_verifier::VerifierInterface,
		fulfill_verifier::VerifierError,
		"http" => create_http_verifier,
		"scripted" => create_scripted_verifier,
		"simulated" => create_simulated_verifier,
	);

	let factories = FulfillmentFactories {
		storage_factories,
		verifier_factories,
	};

	Ok(builder.build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use fulfill_config::builders::ConfigBuilder;
	use tempfile::tempdir;

	#[test]
	fn test_args_defaults() {
		let args = Args::parse_from(["fulfill"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["fulfill", "--config", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_multiple_entries() {
		let factories = create_factory_map!(
			fulfill_verifier::VerifierInterface,
			fulfill_verifier::VerifierError,
			"scripted" => create_scripted_verifier,
			"simulated" => create_simulated_verifier,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("scripted"));
		assert!(factories.contains_key("simulated"));
	}

	#[test]
	fn test_demo_config_parses() {
		let config: Config = include_str!("../../../config/demo.toml").parse().unwrap();
		assert_eq!(config.storage.primary, "file");
		assert_eq!(config.verifier.primary, "simulated");
		assert!(config.api.is_some_and(|api| api.enabled));
	}

	#[tokio::test]
	async fn test_build_engine_with_minimal_config() {
		let engine = build_engine(ConfigBuilder::new().build()).await;
		assert!(engine.is_ok(), "Failed to build engine: {:?}", engine.err());
	}

	#[tokio::test]
	async fn test_build_engine_from_file() {
		let dir = tempdir().unwrap();
		let config_path = dir.path().join("config.toml");
		let storage_path = dir.path().join("storage");
		let config_content = format!(
			r#"
[monitor]
poll_interval_seconds = 5
max_attempts = 3

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "{}"

[verifier]
primary = "scripted"
[verifier.implementations.scripted]
default = true
"#,
			storage_path.display()
		);
		std::fs::write(&config_path, config_content).unwrap();

		let config = Config::from_file(config_path.to_str().unwrap()).await.unwrap();
		assert_eq!(config.monitor.max_attempts, 3);

		let engine = build_engine(config).await.unwrap();
		let order = engine.create_order("alice", 9).await.unwrap();
		engine.shutdown().await.unwrap();
		engine.run_cycle().await.unwrap();
		assert!(engine.get_order(&order.id).await.unwrap().credential.is_some());
	}
}
