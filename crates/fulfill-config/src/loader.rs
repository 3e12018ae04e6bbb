//! Loader for configuration split across several files.
//!
//! The entry file may carry `include = "other.toml"` or
//! `include = ["a.toml", "b.toml"]`. Included files are merged into the entry
//! file by top-level section; a section may be defined in only one file.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Loads an entry configuration file and its includes.
pub struct ConfigLoader {
	/// Directory relative includes are resolved against.
	base_path: PathBuf,
	/// Canonical paths already read, to reject include cycles.
	visited: HashSet<PathBuf>,
	/// File that defined each top-level section.
	owners: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			visited: HashSet::new(),
			owners: HashMap::new(),
		}
	}

	/// Loads, merges, resolves and validates the configuration.
	pub async fn load_config(&mut self, entry: impl AsRef<Path>) -> Result<Config, ConfigError> {
		let entry = self.resolve_path(entry)?;
		let content = self.read(&entry).await?;
		let mut root: toml::Value = toml::from_str(&content)?;

		let includes = take_includes(&mut root)?;
		if includes.is_empty() {
			return content.parse();
		}

		self.claim_sections(&root, &entry)?;
		for include in includes {
			let path = self.resolve_path(&include)?;
			let included: toml::Value = toml::from_str(&self.read(&path).await?)?;
			self.claim_sections(&included, &path)?;

			if let (Some(target), Some(source)) = (root.as_table_mut(), included.as_table()) {
				for (section, value) in source {
					target.insert(section.clone(), value.clone());
				}
			}
		}

		let merged = toml::to_string(&root).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		merged.parse()
	}

	/// Reads a file once, resolving environment variables.
	async fn read(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical = tokio::fs::canonicalize(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.visited.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	/// Records `file` as the owner of each of its sections.
	fn claim_sections(&mut self, value: &toml::Value, file: &Path) -> Result<(), ConfigError> {
		let Some(table) = value.as_table() else {
			return Ok(());
		};
		for section in table.keys() {
			if let Some(owner) = self.owners.get(section) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					section,
					owner.display(),
					file.display()
				)));
			}
			self.owners.insert(section.clone(), file.to_path_buf());
		}
		Ok(())
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

/// Removes and returns the `include` directive of an entry file.
fn take_includes(root: &mut toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	let Some(include) = root.as_table_mut().and_then(|t| t.remove("include")) else {
		return Ok(Vec::new());
	};

	match include {
		toml::Value::String(path) => Ok(vec![PathBuf::from(path)]),
		toml::Value::Array(items) => items
			.into_iter()
			.map(|item| match item {
				toml::Value::String(path) => Ok(PathBuf::from(path)),
				_ => Err(ConfigError::Validation(
					"Include array must contain only strings".into(),
				)),
			})
			.collect(),
		_ => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const STORAGE: &str = r#"
[storage]
primary = "memory"
[storage.implementations.memory]
"#;

	const VERIFIER: &str = r#"
[verifier]
primary = "scripted"
[verifier.implementations.scripted]
default = true
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");

		let config_content = format!("[monitor]\nmax_attempts = 4\n{}{}", STORAGE, VERIFIER);
		fs::write(&config_path, config_content).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config(&config_path).await.unwrap();

		assert_eq!(config.monitor.max_attempts, 4);
		assert_eq!(config.verifier.primary, "scripted");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();

		let main_config = r#"
include = ["storage.toml", "verifier.toml"]

[monitor]
poll_interval_seconds = 10
"#;

		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("storage.toml"), STORAGE).unwrap();
		fs::write(temp_dir.path().join("verifier.toml"), VERIFIER).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("main.toml").await.unwrap();

		assert_eq!(config.monitor.poll_interval_seconds, 10);
		assert_eq!(config.storage.primary, "memory");
		assert_eq!(config.verifier.primary, "scripted");
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();

		let main_config = format!("include = [\"duplicate.toml\"]\n{}{}", STORAGE, VERIFIER);

		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("duplicate.toml"), STORAGE).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let result = loader.load_config("main.toml").await;

		assert!(result.is_err());
		let error_msg = result.unwrap_err().to_string();
		assert!(error_msg.contains("Duplicate section 'storage'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();

		let config = format!("include = [\"self.toml\"]\n{}", STORAGE);
		fs::write(temp_dir.path().join("self.toml"), config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let result = loader.load_config("self.toml").await;

		assert!(result.is_err());
		let error_msg = result.unwrap_err().to_string();
		assert!(error_msg.contains("already loaded"));
	}

	#[tokio::test]
	async fn test_missing_include() {
		let temp_dir = TempDir::new().unwrap();

		let config = format!("include = \"absent.toml\"\n{}", STORAGE);
		fs::write(temp_dir.path().join("main.toml"), config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let result = loader.load_config("main.toml").await;
		assert!(matches!(result, Err(ConfigError::Io(_))));
	}
}
