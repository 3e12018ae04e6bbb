//! Credential issuance and redemption.
//!
//! Credentials are human-typed secrets of four four-character groups drawn
//! from an alphabet without look-alike characters (`0/O`, `1/I/L`). Value
//! uniqueness and the one-credential-per-order rule are both enforced with
//! storage-level insert-if-absent; redemption flips `used` with
//! compare-and-swap so at most one concurrent caller succeeds.
//!
//! A credential is minted before its order is committed as fulfilled, so a
//! record only counts once the order it names is `fulfilled` and bound to
//! that exact value. Until then lookups and redemption report `NotFound`.

use crate::clock::Clock;
use fulfill_storage::{StorageError, StorageService};
use fulfill_types::{truncate_id, Credential, Order, OrderStatus, StorageKey};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

/// Characters a credential may contain.
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const GROUPS: usize = 4;
const GROUP_LEN: usize = 4;
/// Give up after this many value collisions in a row.
const MAX_GENERATION_ATTEMPTS: usize = 8;

/// Errors that can occur while issuing or redeeming credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
	#[error("Credential not found")]
	NotFound,
	#[error("Credential already used")]
	AlreadyUsed,
	/// The order already has a credential; carries its value.
	#[error("Credential already issued for order")]
	AlreadyIssued(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for CredentialError {
	fn from(err: StorageError) -> Self {
		match err {
			StorageError::NotFound => CredentialError::NotFound,
			other => CredentialError::Storage(other.to_string()),
		}
	}
}

/// Generates a fresh credential value such as `K7QM-3XWP-HN2D-RT9V`.
pub fn generate_value() -> String {
	let mut rng = rand::thread_rng();
	let groups: Vec<String> = (0..GROUPS)
		.map(|_| {
			(0..GROUP_LEN)
				.map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
				.collect()
		})
		.collect();
	groups.join("-")
}

/// Canonical form of a user-supplied value.
fn canonical(value: &str) -> String {
	value.trim().to_ascii_uppercase()
}

/// Issues, looks up and redeems credentials.
pub struct CredentialIssuer {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl CredentialIssuer {
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Mints and persists an unused credential bound to `order_id`.
	///
	/// Fails with `AlreadyIssued` carrying the existing value if the order
	/// already has one, so a caller that crashed between issuing and binding
	/// can pick up where it left off.
	pub async fn issue(&self, order_id: &str) -> Result<Credential, CredentialError> {
		let by_order = StorageKey::CredentialByOrder.as_str();
		if let Some(existing) = self.credential_for_order(order_id).await? {
			self.restore_record(&existing, order_id).await?;
			return Err(CredentialError::AlreadyIssued(existing));
		}

		let credential = self.insert_unique(order_id).await?;

		match self.storage.insert(by_order, order_id, &credential.value).await {
			Ok(()) => {
				tracing::info!(order_id = %truncate_id(order_id), "Issued credential");
				Ok(credential)
			},
			Err(StorageError::AlreadyExists(_)) => {
				// Lost a race for this order. The record just written is never
				// handed out.
				let existing = self
					.credential_for_order(order_id)
					.await?
					.ok_or(CredentialError::NotFound)?;
				Err(CredentialError::AlreadyIssued(existing))
			},
			Err(e) => Err(e.into()),
		}
	}

	/// Marks a credential as used. Exactly one concurrent caller succeeds.
	pub async fn redeem(&self, value: &str) -> Result<Credential, CredentialError> {
		let namespace = StorageKey::Credentials.as_str();
		let value = canonical(value);
		loop {
			let current = self
				.storage
				.retrieve_versioned::<Credential>(namespace, &value)
				.await?;
			if !self.is_bound(&current.value).await? {
				return Err(CredentialError::NotFound);
			}
			if current.value.used {
				return Err(CredentialError::AlreadyUsed);
			}

			let mut redeemed = current.value.clone();
			redeemed.used = true;
			redeemed.redeemed_at = Some(self.clock.now());

			match self
				.storage
				.replace(namespace, &value, &current, &redeemed)
				.await
			{
				Ok(()) => {
					tracing::info!(
						order_id = %truncate_id(&redeemed.order_id),
						"Credential redeemed"
					);
					return Ok(redeemed);
				},
				Err(StorageError::Conflict(_)) => continue,
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Looks up a credential by value.
	pub async fn get(&self, value: &str) -> Result<Credential, CredentialError> {
		let credential: Credential = self
			.storage
			.retrieve(StorageKey::Credentials.as_str(), &canonical(value))
			.await?;
		if !self.is_bound(&credential).await? {
			return Err(CredentialError::NotFound);
		}
		Ok(credential)
	}

	/// Returns true if the value exists and has not been redeemed.
	pub async fn is_redeemable(&self, value: &str) -> Result<bool, CredentialError> {
		match self.get(value).await {
			Ok(credential) => Ok(!credential.used),
			Err(CredentialError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	/// The credential value bound to an order, if any.
	pub async fn credential_for_order(
		&self,
		order_id: &str,
	) -> Result<Option<String>, CredentialError> {
		match self
			.storage
			.retrieve::<String>(StorageKey::CredentialByOrder.as_str(), order_id)
			.await
		{
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Deletes the credential issued for an order that will never be
	/// fulfilled. Returns the voided value, if there was one.
	pub async fn void_for_order(&self, order_id: &str) -> Result<Option<String>, CredentialError> {
		let Some(value) = self.credential_for_order(order_id).await? else {
			return Ok(None);
		};
		// Record first, so an interrupted void never strands a record
		// without its index entry.
		self.storage
			.remove(StorageKey::Credentials.as_str(), &value)
			.await?;
		self.storage
			.remove(StorageKey::CredentialByOrder.as_str(), order_id)
			.await?;
		tracing::info!(order_id = %truncate_id(order_id), "Voided unbound credential");
		Ok(Some(value))
	}

	/// True once the owning order is fulfilled with this credential.
	async fn is_bound(&self, credential: &Credential) -> Result<bool, CredentialError> {
		match self
			.storage
			.retrieve::<Order>(StorageKey::Orders.as_str(), &credential.order_id)
			.await
		{
			Ok(order) => Ok(order.status == OrderStatus::Fulfilled
				&& order.credential.as_deref() == Some(credential.value.as_str())),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e.into()),
		}
	}

	/// Writes a new credential under a value nobody holds yet.
	async fn insert_unique(&self, order_id: &str) -> Result<Credential, CredentialError> {
		let namespace = StorageKey::Credentials.as_str();
		for _ in 0..MAX_GENERATION_ATTEMPTS {
			let credential = Credential::new(generate_value(), order_id.to_string(), self.clock.now());
			match self
				.storage
				.insert(namespace, &credential.value, &credential)
				.await
			{
				Ok(()) => return Ok(credential),
				Err(StorageError::AlreadyExists(_)) => {
					tracing::warn!(order_id = %truncate_id(order_id), "Credential collision, regenerating");
				},
				Err(e) => return Err(e.into()),
			}
		}
		Err(CredentialError::Storage(format!(
			"No free credential value after {} attempts",
			MAX_GENERATION_ATTEMPTS
		)))
	}

	/// Recreates the record behind an index entry if it went missing.
	async fn restore_record(&self, value: &str, order_id: &str) -> Result<(), CredentialError> {
		let namespace = StorageKey::Credentials.as_str();
		if self.storage.exists(namespace, value).await? {
			return Ok(());
		}
		let credential = Credential::new(value.to_string(), order_id.to_string(), self.clock.now());
		match self.storage.insert(namespace, value, &credential).await {
			Ok(()) | Err(StorageError::AlreadyExists(_)) => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use fulfill_storage::implementations::memory::MemoryStorage;
	use std::collections::HashSet;

	fn issuer() -> (CredentialIssuer, Arc<StorageService>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let issuer = CredentialIssuer::new(storage.clone(), Arc::new(ManualClock::new(1_000)));
		(issuer, storage)
	}

	/// Stores `order_id` as fulfilled with `value`, the way a committed
	/// confirmation leaves it.
	async fn bind(storage: &StorageService, order_id: &str, value: &str) {
		let mut order = Order::new(order_id.into(), "alice".into(), 1, 900);
		order.status = OrderStatus::Fulfilled;
		order.credential = Some(value.into());
		storage
			.store(StorageKey::Orders.as_str(), order_id, &order)
			.await
			.unwrap();
	}

	async fn issue_bound(
		issuer: &CredentialIssuer,
		storage: &StorageService,
		order_id: &str,
	) -> Credential {
		let credential = issuer.issue(order_id).await.unwrap();
		bind(storage, order_id, &credential.value).await;
		credential
	}

	#[test]
	fn test_value_format() {
		for _ in 0..100 {
			let value = generate_value();
			let groups: Vec<_> = value.split('-').collect();
			assert_eq!(groups.len(), GROUPS);
			for group in groups {
				assert_eq!(group.len(), GROUP_LEN);
				assert!(group.bytes().all(|b| ALPHABET.contains(&b)));
			}
			assert!(!value.contains(['0', 'O', '1', 'I', 'L']));
		}
	}

	#[tokio::test]
	async fn test_issue_then_redeem_once() {
		let (issuer, storage) = issuer();
		let credential = issue_bound(&issuer, &storage, "order-1").await;
		assert!(!credential.used);
		assert_eq!(credential.issued_at, 1_000);
		assert!(issuer.is_redeemable(&credential.value).await.unwrap());

		let redeemed = issuer.redeem(&credential.value).await.unwrap();
		assert!(redeemed.used);
		assert_eq!(redeemed.redeemed_at, Some(1_000));

		assert!(matches!(
			issuer.redeem(&credential.value).await,
			Err(CredentialError::AlreadyUsed)
		));
		assert!(!issuer.is_redeemable(&credential.value).await.unwrap());
	}

	#[tokio::test]
	async fn test_redeem_unknown_value() {
		let (issuer, _) = issuer();
		assert!(matches!(
			issuer.redeem("AAAA-BBBB-CCCC-DDDD").await,
			Err(CredentialError::NotFound)
		));
		assert!(!issuer.is_redeemable("AAAA-BBBB-CCCC-DDDD").await.unwrap());
	}

	#[tokio::test]
	async fn test_redeem_accepts_lowercase_input() {
		let (issuer, storage) = issuer();
		let credential = issue_bound(&issuer, &storage, "order-1").await;
		let typed = format!("  {} ", credential.value.to_lowercase());
		assert!(issuer.redeem(&typed).await.is_ok());
	}

	#[tokio::test]
	async fn test_second_issue_returns_existing() {
		let (issuer, _) = issuer();
		let first = issuer.issue("order-1").await.unwrap();

		match issuer.issue("order-1").await {
			Err(CredentialError::AlreadyIssued(existing)) => assert_eq!(existing, first.value),
			other => panic!("expected AlreadyIssued, got {:?}", other),
		}
		assert_eq!(
			issuer.credential_for_order("order-1").await.unwrap(),
			Some(first.value)
		);
	}

	#[tokio::test]
	async fn test_missing_record_is_restored() {
		let (issuer, storage) = issuer();
		storage
			.store(
				StorageKey::CredentialByOrder.as_str(),
				"order-1",
				&"WXYZ-2345-6789-ABCD".to_string(),
			)
			.await
			.unwrap();

		assert!(matches!(
			issuer.issue("order-1").await,
			Err(CredentialError::AlreadyIssued(_))
		));
		let restored: Credential = storage
			.retrieve(StorageKey::Credentials.as_str(), "WXYZ-2345-6789-ABCD")
			.await
			.unwrap();
		assert_eq!(restored.order_id, "order-1");
		assert!(!restored.used);
	}

	#[tokio::test]
	async fn test_concurrent_redemption_has_one_winner() {
		let (issuer, storage) = issuer();
		let issuer = Arc::new(issuer);
		let value = issue_bound(&issuer, &storage, "order-1").await.value;

		let mut handles = Vec::new();
		for _ in 0..16 {
			let issuer = issuer.clone();
			let value = value.clone();
			handles.push(tokio::spawn(async move { issuer.redeem(&value).await }));
		}

		let mut winners = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => winners += 1,
				Err(CredentialError::AlreadyUsed) => {},
				Err(e) => panic!("unexpected error: {}", e),
			}
		}
		assert_eq!(winners, 1);
	}

	#[tokio::test]
	async fn test_values_are_unique_across_orders() {
		let (issuer, _) = issuer();
		let mut seen = HashSet::new();
		for i in 0..50 {
			let credential = issuer.issue(&format!("order-{}", i)).await.unwrap();
			assert!(seen.insert(credential.value));
		}
	}

	#[tokio::test]
	async fn test_unbound_credential_is_not_redeemable() {
		let (issuer, storage) = issuer();
		let credential = issuer.issue("order-1").await.unwrap();

		// No order record yet.
		assert!(matches!(
			issuer.redeem(&credential.value).await,
			Err(CredentialError::NotFound)
		));

		// Order exists but is still monitoring.
		let order = Order::new("order-1".into(), "alice".into(), 1, 900);
		storage
			.store(StorageKey::Orders.as_str(), "order-1", &order)
			.await
			.unwrap();
		assert!(!issuer.is_redeemable(&credential.value).await.unwrap());
		assert!(matches!(
			issuer.get(&credential.value).await,
			Err(CredentialError::NotFound)
		));

		// Fulfilled with some other value.
		bind(&storage, "order-1", "AAAA-BBBB-CCCC-DDDD").await;
		assert!(matches!(
			issuer.redeem(&credential.value).await,
			Err(CredentialError::NotFound)
		));

		bind(&storage, "order-1", &credential.value).await;
		assert!(issuer.redeem(&credential.value).await.is_ok());
	}

	#[tokio::test]
	async fn test_void_for_order() {
		let (issuer, storage) = issuer();
		assert_eq!(issuer.void_for_order("order-1").await.unwrap(), None);

		let credential = issuer.issue("order-1").await.unwrap();
		assert_eq!(
			issuer.void_for_order("order-1").await.unwrap(),
			Some(credential.value.clone())
		);
		assert!(!storage
			.exists(StorageKey::Credentials.as_str(), &credential.value)
			.await
			.unwrap());
		assert_eq!(issuer.credential_for_order("order-1").await.unwrap(), None);

		// Even a stale fulfilled record cannot bring the value back.
		bind(&storage, "order-1", &credential.value).await;
		assert!(matches!(
			issuer.redeem(&credential.value).await,
			Err(CredentialError::NotFound)
		));
	}
}
