//! In-memory storage backend.
//!
//! Useful for tests and development where persistence across restarts is not
//! required. Compare-and-swap runs under the map's write lock.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fulfill_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage implementation.
pub struct MemoryStorage {
	/// The in-memory store protected by a read-write lock.
	store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let mut store = self.store.write().await;
		if store.get(key).map(Vec::as_slice) != expected {
			return Ok(false);
		}
		store.insert(key.to_string(), value);
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.keys()
			.filter(|key| key.starts_with(prefix))
			.cloned()
			.collect())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// Memory storage has no configuration
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "orders:1";
		let value = b"test_value".to_vec();
		storage.set_bytes(key, value.clone()).await.unwrap();

		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes("orders:2").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_compare_and_swap() {
		let storage = MemoryStorage::new();
		let key = "credentials:ABCD";

		assert!(storage
			.compare_and_swap(key, None, b"v1".to_vec())
			.await
			.unwrap());
		// Key now present, insert-if-absent must fail
		assert!(!storage
			.compare_and_swap(key, None, b"v2".to_vec())
			.await
			.unwrap());
		// Wrong expectation
		assert!(!storage
			.compare_and_swap(key, Some(b"v0"), b"v2".to_vec())
			.await
			.unwrap());
		assert!(storage
			.compare_and_swap(key, Some(b"v1"), b"v2".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"v2".to_vec());
	}

	#[tokio::test]
	async fn test_delete() {
		let storage = MemoryStorage::new();
		storage.set_bytes("orders:1", b"v".to_vec()).await.unwrap();

		storage.delete("orders:1").await.unwrap();
		assert!(!storage.exists("orders:1").await.unwrap());
		// Deleting again is a no-op.
		storage.delete("orders:1").await.unwrap();
		// The key is free for insert-if-absent again.
		assert!(storage
			.compare_and_swap("orders:1", None, b"w".to_vec())
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_concurrent_inserts_single_winner() {
		let storage = Arc::new(MemoryStorage::new());
		let mut handles = Vec::new();
		for i in 0..16u8 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				storage
					.compare_and_swap("credentials:SAME", None, vec![i])
					.await
					.unwrap()
			}));
		}

		let mut winners = 0;
		for handle in handles {
			if handle.await.unwrap() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);
	}

	#[test]
	fn test_registry_name() {
		assert_eq!(Registry::NAME, "memory");
		assert!(create_storage(&toml::Value::Table(Default::default())).is_ok());
	}
}
