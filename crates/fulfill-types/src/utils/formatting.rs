//! Formatting helpers for log output and index keys.

/// Truncates an identifier for display, keeping the first 8 characters.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}

/// Normalizes a requester identity for case-insensitive lookups.
pub fn normalize_identity(identity: &str) -> String {
	identity.trim().to_lowercase()
}
