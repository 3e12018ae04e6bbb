//! Redemption credential types.

use serde::{Deserialize, Serialize};

/// A single-use secret bound to exactly one fulfilled order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// The secret value handed to the requester.
	pub value: String,
	/// The order this credential was issued for.
	pub order_id: String,
	/// Whether the credential has been redeemed. Only ever goes false -> true.
	pub used: bool,
	/// Unix timestamp (seconds) of issuance.
	pub issued_at: u64,
	/// Unix timestamp (seconds) of redemption, if redeemed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub redeemed_at: Option<u64>,
}

impl Credential {
	pub fn new(value: String, order_id: String, issued_at: u64) -> Self {
		Self {
			value,
			order_id,
			used: false,
			issued_at,
			redeemed_at: None,
		}
	}
}
