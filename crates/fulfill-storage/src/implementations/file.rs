//! File-based storage backend.
//!
//! Each record lives in its own file under `<storage_path>/<namespace>/`,
//! named by the hex encoding of its id so arbitrary ids map to safe file
//! names and can be listed back. Writes go to a temp file that is renamed
//! into place, so readers never see a partially written record.
//!
//! One process owns a storage directory at a time: construction takes an
//! exclusive lock on `<storage_path>/.lock` and holds it for the lifetime of
//! the backend. Within the process, writes are serialized by a mutex so
//! compare-and-swap is atomic.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use fulfill_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const RECORD_EXTENSION: &str = "json";
const LOCK_FILE: &str = ".lock";
const DEFAULT_NAMESPACE: &str = "_";

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Serializes writers within this process.
	write_lock: Mutex<()>,
	/// Held for the lifetime of the backend; dropping it releases the lock.
	_dir_lock: File,
}

impl FileStorage {
	/// Opens (creating if needed) a storage directory and locks it.
	pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let base_path = base_path.into();
		std::fs::create_dir_all(&base_path).map_err(|e| {
			StorageError::Backend(format!("Cannot create {}: {}", base_path.display(), e))
		})?;

		let lock_path = base_path.join(LOCK_FILE);
		let dir_lock = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&lock_path)
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		dir_lock.try_lock_exclusive().map_err(|_| {
			StorageError::Backend(format!(
				"Storage directory {} is locked by another process",
				base_path.display()
			))
		})?;

		tracing::debug!(path = %base_path.display(), "Opened file storage");

		Ok(Self {
			base_path,
			write_lock: Mutex::new(()),
			_dir_lock: dir_lock,
		})
	}

	/// Maps `namespace:id` to `<base>/<namespace>/<hex(id)>.json`.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = key.split_once(':').unwrap_or((DEFAULT_NAMESPACE, key));
		self.base_path
			.join(sanitize_namespace(namespace))
			.join(format!("{}.{}", hex::encode(id), RECORD_EXTENSION))
	}

	async fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	/// Writes atomically by writing to a temp file then renaming.
	///
	/// Callers must hold `write_lock`.
	async fn write_atomic(&self, path: &Path, value: Vec<u8>) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	/// Lists the decoded ids stored under one namespace directory.
	async fn list_namespace(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.base_path.join(namespace);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut ids = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new(RECORD_EXTENSION)) {
				continue;
			}
			let decoded = path
				.file_stem()
				.and_then(|stem| stem.to_str())
				.and_then(|stem| hex::decode(stem).ok())
				.and_then(|bytes| String::from_utf8(bytes).ok());
			match decoded {
				Some(id) => ids.push(id),
				None => tracing::debug!("Skipping unrecognized file {:?}", path),
			}
		}
		Ok(ids)
	}
}

/// Namespaces are fixed identifiers; anything outside `[a-z0-9_]` is replaced.
fn sanitize_namespace(namespace: &str) -> String {
	namespace
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '_' {
				c
			} else {
				'_'
			}
		})
		.collect()
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_optional(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		let _guard = self.write_lock.lock().await;
		self.write_atomic(&path, value).await
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let path = self.get_file_path(key);
		let _guard = self.write_lock.lock().await;

		let current = self.read_optional(&path).await?;
		if current.as_deref() != expected {
			return Ok(false);
		}
		self.write_atomic(&path, value).await?;
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		let _guard = self.write_lock.lock().await;
		match fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let namespaces = match prefix.split_once(':') {
			Some((namespace, _)) => vec![sanitize_namespace(namespace)],
			None => {
				let mut namespaces = Vec::new();
				let mut entries = fs::read_dir(&self.base_path)
					.await
					.map_err(|e| StorageError::Backend(e.to_string()))?;
				while let Some(entry) = entries
					.next_entry()
					.await
					.map_err(|e| StorageError::Backend(e.to_string()))?
				{
					if entry.path().is_dir() {
						namespaces.push(entry.file_name().to_string_lossy().into_owned());
					}
				}
				namespaces
			},
		};

		let mut keys = Vec::new();
		for namespace in namespaces {
			for id in self.list_namespace(&namespace).await? {
				let key = format!("{}:{}", namespace, id);
				if key.starts_with(prefix) {
					keys.push(key);
				}
			}
		}
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(path) if !path.trim().is_empty() => Ok(()),
					_ => Err("storage_path cannot be empty".into()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::open(storage_path)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
