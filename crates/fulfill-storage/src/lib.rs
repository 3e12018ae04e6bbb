//! Storage module for the fulfillment system.
//!
//! This module provides the durable record store behind orders and
//! credentials. Backends expose raw byte operations plus an atomic
//! compare-and-swap; [`StorageService`] layers typed JSON records, optimistic
//! versioning and insert-if-absent (the uniqueness constraint) on top.

use async_trait::async_trait;
use fulfill_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs when inserting a key that is already taken.
	#[error("Already exists: {0}")]
	AlreadyExists(String),
	/// Error that occurs when a compare-and-swap finds a newer value.
	#[error("Conflicting update: {0}")]
	Conflict(String),
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys have the form `namespace:id`. Every mutation that must not lose a
/// concurrent update goes through [`StorageInterface::compare_and_swap`],
/// which backends must execute atomically.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes unconditionally.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Atomically replaces the value at `key` if it currently equals `expected`.
	///
	/// `expected = None` means the key must be absent (insert-if-absent).
	/// Returns `Ok(false)` when the current value does not match.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Removes a key. Removing an absent key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all keys starting with `prefix`.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// A record read together with the exact bytes it was decoded from.
///
/// Passing it back to [`StorageService::replace`] turns the write into a
/// compare-and-swap against that snapshot.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
	pub value: T,
	version: Vec<u8>,
}

impl<T> Versioned<T> {
	pub fn into_inner(self) -> T {
		self.value
	}
}

fn make_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// High-level storage service that provides typed operations.
///
/// Wraps a low-level backend and stores values as JSON under
/// `namespace:id` keys.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value, overwriting any previous value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = make_key(namespace, id);
		self.backend.set_bytes(&key, encode(data)?).await
	}

	/// Stores a value only if nothing is stored under the key yet.
	///
	/// This is the storage-level uniqueness constraint: of two concurrent
	/// inserts for the same id, exactly one succeeds.
	pub async fn insert<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = make_key(namespace, id);
		if self
			.backend
			.compare_and_swap(&key, None, encode(data)?)
			.await?
		{
			Ok(())
		} else {
			Err(StorageError::AlreadyExists(key))
		}
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let key = make_key(namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		decode(&bytes)
	}

	/// Retrieves a value along with the version needed for [`Self::replace`].
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let key = make_key(namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		Ok(Versioned {
			value: decode(&bytes)?,
			version: bytes,
		})
	}

	/// Replaces a previously read value, failing with `Conflict` if it
	/// changed since it was read.
	pub async fn replace<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		current: &Versioned<T>,
		data: &T,
	) -> Result<(), StorageError> {
		let key = make_key(namespace, id);
		if self
			.backend
			.compare_and_swap(&key, Some(&current.version), encode(data)?)
			.await?
		{
			Ok(())
		} else {
			Err(StorageError::Conflict(key))
		}
	}

	/// Retrieves every value stored under a namespace, keyed by id.
	///
	/// Entries that vanish between listing and reading are skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = make_key(namespace, "");
		let keys = self.backend.list_keys(&prefix).await?;
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			let bytes = match self.backend.get_bytes(&key).await {
				Ok(bytes) => bytes,
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};
			let id = key[prefix.len()..].to_string();
			values.push((id, decode(&bytes)?));
		}
		Ok(values)
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&make_key(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&make_key(namespace, id)).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Record {
		name: String,
		count: u32,
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_insert_is_unique() {
		let storage = service();
		let record = Record {
			name: "a".into(),
			count: 1,
		};

		storage.insert("records", "1", &record).await.unwrap();
		let err = storage.insert("records", "1", &record).await.unwrap_err();
		assert!(matches!(err, StorageError::AlreadyExists(_)));
	}

	#[tokio::test]
	async fn test_replace_detects_concurrent_update() {
		let storage = service();
		storage
			.store(
				"records",
				"1",
				&Record {
					name: "a".into(),
					count: 0,
				},
			)
			.await
			.unwrap();

		let first = storage
			.retrieve_versioned::<Record>("records", "1")
			.await
			.unwrap();
		let second = storage
			.retrieve_versioned::<Record>("records", "1")
			.await
			.unwrap();

		let mut bumped = first.value.clone();
		bumped.count += 1;
		storage.replace("records", "1", &first, &bumped).await.unwrap();

		// The second writer read the old snapshot and must lose.
		let mut stale = second.value.clone();
		stale.count += 1;
		let err = storage
			.replace("records", "1", &second, &stale)
			.await
			.unwrap_err();
		assert!(matches!(err, StorageError::Conflict(_)));

		let stored: Record = storage.retrieve("records", "1").await.unwrap();
		assert_eq!(stored.count, 1);
	}

	#[tokio::test]
	async fn test_retrieve_all_scopes_to_namespace() {
		let storage = service();
		let record = Record {
			name: "a".into(),
			count: 1,
		};
		storage.store("records", "1", &record).await.unwrap();
		storage.store("records", "2", &record).await.unwrap();
		storage.store("other", "3", &record).await.unwrap();

		let mut all = storage.retrieve_all::<Record>("records").await.unwrap();
		all.sort_by(|a, b| a.0.cmp(&b.0));
		let ids: Vec<_> = all.iter().map(|(id, _)| id.as_str()).collect();
		assert_eq!(ids, vec!["1", "2"]);
	}

	#[tokio::test]
	async fn test_remove() {
		let storage = service();
		let record = Record {
			name: "a".into(),
			count: 1,
		};
		storage.insert("records", "1", &record).await.unwrap();

		storage.remove("records", "1").await.unwrap();
		assert!(!storage.exists("records", "1").await.unwrap());
		storage.insert("records", "1", &record).await.unwrap();
		storage.remove("records", "missing").await.unwrap();
	}

	#[tokio::test]
	async fn test_retrieve_missing() {
		let storage = service();
		let result = storage.retrieve::<Record>("records", "missing").await;
		assert!(matches!(result, Err(StorageError::NotFound)));
		assert!(!storage.exists("records", "missing").await.unwrap());
	}
}
