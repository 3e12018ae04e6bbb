//! Common types for the fulfillment system.
//!
//! Shared data model, storage namespaces, configuration validation and API
//! types used by every fulfillment crate.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Redemption credential types.
pub mod credential;
/// Event types for observability collaborators.
pub mod events;
/// Order record, status and monitoring policy.
pub mod order;
/// Base trait for self-registering implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;
/// Helpers for formatting and time.
pub mod utils;
/// Configuration validation types.
pub mod validation;

pub use api::*;
pub use credential::*;
pub use events::*;
pub use order::*;
pub use registry::*;
pub use storage::*;
pub use utils::{current_timestamp, normalize_identity, truncate_id};
pub use validation::*;
