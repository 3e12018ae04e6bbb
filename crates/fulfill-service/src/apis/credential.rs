//! Credential endpoints: redemption and the redeemable check.

use super::engine_error;
use fulfill_core::FulfillmentEngine;
use fulfill_types::{truncate_id, APIError, CredentialResponse, RedeemRequest};

const CREDENTIAL_NOT_FOUND: &str = "CREDENTIAL_NOT_FOUND";

/// Handles POST /api/credentials/redeem.
pub async fn redeem(
	request: RedeemRequest,
	engine: &FulfillmentEngine,
) -> Result<CredentialResponse, APIError> {
	match engine.redeem(&request.value).await {
		Ok(credential) => {
			tracing::info!(order_id = %truncate_id(&credential.order_id), "Redeemed via API");
			Ok(credential.into())
		},
		Err(e) => {
			tracing::warn!(error = %e, "Redemption rejected");
			Err(engine_error(e, CREDENTIAL_NOT_FOUND))
		},
	}
}

/// Handles GET /api/credentials/{value}.
pub async fn get_credential(
	value: &str,
	engine: &FulfillmentEngine,
) -> Result<CredentialResponse, APIError> {
	engine
		.credential(value)
		.await
		.map(CredentialResponse::from)
		.map_err(|e| engine_error(e, CREDENTIAL_NOT_FOUND))
}
