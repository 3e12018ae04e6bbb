//! Small helpers shared across the fulfillment crates.

pub mod formatting;
pub mod helpers;

pub use formatting::{normalize_identity, truncate_id};
pub use helpers::current_timestamp;
