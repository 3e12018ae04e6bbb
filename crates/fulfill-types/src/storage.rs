//! Storage-related types for the fulfillment system.

use std::str::FromStr;

/// Storage keys for different data collections.
///
/// Replaces string literals in storage calls with strongly typed namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records keyed by order id
	Orders,
	/// Credential records keyed by credential value
	Credentials,
	/// Credential value bound to an order, keyed by order id
	CredentialByOrder,
	/// Creation-ordered order ids, keyed by normalized requester identity
	OrdersByRequester,
	/// Ids of orders that may still be in `monitoring`, keyed by order id
	ActiveOrders,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Credentials => "credentials",
			StorageKey::CredentialByOrder => "credential_by_order",
			StorageKey::OrdersByRequester => "orders_by_requester",
			StorageKey::ActiveOrders => "active_orders",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::Credentials,
			Self::CredentialByOrder,
			Self::OrdersByRequester,
			Self::ActiveOrders,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"credentials" => Ok(Self::Credentials),
			"credential_by_order" => Ok(Self::CredentialByOrder),
			"orders_by_requester" => Ok(Self::OrdersByRequester),
			"active_orders" => Ok(Self::ActiveOrders),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_storage_key_round_trips_through_str() {
		for key in StorageKey::all() {
			assert_eq!(key.as_str().parse::<StorageKey>(), Ok(key));
		}
		assert!("quotes".parse::<StorageKey>().is_err());
	}
}
