//! Request handlers behind the HTTP routes.

pub mod credential;
pub mod order;

use fulfill_core::EngineError;
use fulfill_types::APIError;

/// Seconds a client should wait before retrying after a storage failure.
const STORAGE_RETRY_AFTER: u64 = 5;

/// Maps the engine's error taxonomy onto API errors.
///
/// `not_found` is the error code used for a missing record, since the same
/// engine error covers both orders and credentials.
pub fn engine_error(err: EngineError, not_found: &str) -> APIError {
	match err {
		EngineError::Validation(message) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".into(),
			message,
		},
		EngineError::NotFound(message) => APIError::NotFound {
			error_type: not_found.into(),
			message,
		},
		EngineError::AlreadyUsed => APIError::Conflict {
			error_type: "CREDENTIAL_ALREADY_USED".into(),
			message: "Credential has already been redeemed".into(),
		},
		EngineError::Storage(message) => {
			tracing::error!(error = %message, "Storage failure while serving request");
			APIError::ServiceUnavailable {
				error_type: "STORAGE_UNAVAILABLE".into(),
				message,
				retry_after: Some(STORAGE_RETRY_AFTER),
			}
		},
	}
}
